use std::{process::ExitCode, sync::Arc};

use anyhow::Context as _;
use certkeeper::{
    acme::HttpAcmeClient,
    artifact::ArtifactStore,
    clock::SystemClock,
    config::{Cli, Config, Invocation},
    dns::DohOracle,
    key_pair::RsaKeyPairGenerator,
    namecheap::{NamecheapClient, NamecheapCredentials},
    orchestrator::{Context, Orchestrator},
    provisioner::RegistrarChallengeProvisioner,
    storage::open_storage,
};

fn main() -> ExitCode {
    let cli = match Cli::parse_invocation(std::env::args_os()) {
        Invocation::Run(cli) => cli,
        Invocation::Exit(e) => e.exit(),
        Invocation::Usage(e) => {
            // 日誌尚未初始化，stderr 寫不出去時也沒有其他回報管道
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Startup failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = Config::from_cli(cli)?;
    tracing::info!(
        domain = %config.domain,
        email = %config.email,
        bucket = %config.bucket,
        directory = config.directory_url(),
        "Starting certificate run"
    );

    let credentials = NamecheapCredentials::from_file(&config.credentials_path).with_context(|| {
        format!(
            "failed to read registrar credentials from {}",
            config.credentials_path.display()
        )
    })?;
    let clock = Arc::new(
        SystemClock::with_signal_handlers().context("failed to register signal handlers")?,
    );

    let storage = open_storage(&config.bucket)
        .with_context(|| format!("failed to open bucket {}", config.bucket))?;
    let store = ArtifactStore::new(storage, config.location.as_deref());

    let client_ip = NamecheapClient::fetch_client_ip().context("failed to determine public IP")?;
    tracing::debug!(client_ip = %client_ip, "Using registrar client IP");
    let provisioner = RegistrarChallengeProvisioner::new(
        Box::new(NamecheapClient::new(credentials, client_ip)),
        Box::new(DohOracle::default()),
        clock.clone(),
    );

    let api = HttpAcmeClient::new(config.directory_url())
        .context("failed to fetch the ACME directory")?;

    let orchestrator = Orchestrator::new(Context {
        api: Arc::new(api),
        store,
        keys: Arc::new(RsaKeyPairGenerator::default()),
        provisioner: Arc::new(provisioner),
        clock,
    });

    Ok(orchestrator
        .run(&config.email, &config.domain)
        .is_some())
}
