use std::sync::Arc;

use thiserror::Error;

use crate::{
    acme::AcmeError,
    challenge::{Challenge, ChallengeTrigger},
    clock::{Clock, Interrupted, POLL_INTERVAL},
    dns::DnsPropagationOracle,
    namecheap::{DnsHostRecord, HostRegistrar, RegistrarError},
};

/// DNS-01 驗證記錄的主機名稱。
pub const ACME_CHALLENGE: &str = "_acme-challenge";
/// 驗證記錄的 TTL（秒）。
pub const CHALLENGE_TTL: u32 = 60;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Registrar error: {0}")]
    Registrar(#[from] RegistrarError),
    #[error("ACME error: {0}")]
    Acme(#[from] AcmeError),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

type Result<T> = std::result::Result<T, ProvisionError>;

/// 佈署與移除 DNS-01 驗證記錄。
pub trait ChallengeProvisioner: Send + Sync {
    /// 新增驗證記錄、等待傳播完成後觸發驗證。
    fn process(&self, domain: &str, challenge: &Challenge, trigger: &dyn ChallengeTrigger)
        -> Result<()>;

    /// 移除此挑戰新增的記錄，其餘記錄保持不變。
    fn cleanup(&self, domain: &str, challenge: &Challenge) -> Result<()>;
}

/// 透過整組取代式的註冊商 API 佈署記錄，並以獨立解析器確認傳播。
pub struct RegistrarChallengeProvisioner {
    registrar: Box<dyn HostRegistrar>,
    oracle: Box<dyn DnsPropagationOracle>,
    clock: Arc<dyn Clock>,
}

impl RegistrarChallengeProvisioner {
    pub fn new(
        registrar: Box<dyn HostRegistrar>,
        oracle: Box<dyn DnsPropagationOracle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registrar,
            oracle,
            clock,
        }
    }

    fn wait_for_propagation(&self, record_name: &str, digest: &str) -> Result<()> {
        loop {
            match self.oracle.resolve_txt(record_name) {
                Ok(answers) if answers.iter().any(|a| a.data.trim_matches('"') == digest) => {
                    tracing::info!(record = record_name, "TXT record is visible");
                    return Ok(());
                }
                Ok(_) => tracing::info!(record = record_name, "TXT record propagation in progress"),
                Err(e) => tracing::warn!(record = record_name, error = %e, "TXT lookup failed"),
            }
            self.clock.sleep(POLL_INTERVAL)?;
        }
    }
}

impl ChallengeProvisioner for RegistrarChallengeProvisioner {
    fn process(
        &self,
        domain: &str,
        challenge: &Challenge,
        trigger: &dyn ChallengeTrigger,
    ) -> Result<()> {
        let digest = challenge.dns_txt_value();
        let record_name = format!("{}.{}", ACME_CHALLENGE, domain);

        let mut hosts = self.registrar.get_hosts(domain)?;
        hosts
            .records
            .push(DnsHostRecord::txt(ACME_CHALLENGE, digest.clone(), CHALLENGE_TTL));

        tracing::info!(record = %record_name, value = %digest, "Adding TXT record");
        self.registrar.set_hosts(domain, &hosts)?;

        self.wait_for_propagation(&record_name, &digest)?;

        trigger.trigger(challenge)?;
        Ok(())
    }

    fn cleanup(&self, domain: &str, challenge: &Challenge) -> Result<()> {
        let digest = challenge.dns_txt_value();

        let mut hosts = self.registrar.get_hosts(domain)?;
        hosts
            .records
            .retain(|record| !(record.name == ACME_CHALLENGE && record.address == digest));

        tracing::info!(
            record = %format!("{}.{}", ACME_CHALLENGE, domain),
            value = %digest,
            "Removing TXT record"
        );
        self.registrar.set_hosts(domain, &hosts)?;
        Ok(())
    }
}
