//! 命令列參數與執行設定。

use std::path::PathBuf;

use clap::{error::ErrorKind, Parser};
use thiserror::Error;

use crate::directory::{LETS_ENCRYPT_PRODUCTION, LETS_ENCRYPT_STAGING};

/// 指向 Namecheap API 憑證 JSON 檔的環境變數。
pub const CREDENTIALS_ENV: &str = "NAMECHEAP_CREDENTIALS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {0} is not set")]
    MissingCredentials(&'static str),
}

#[derive(Debug, Parser)]
#[command(
    name = "certkeeper",
    version,
    about = "Issue and renew a certificate for a domain and its wildcard via ACME DNS-01"
)]
pub struct Cli {
    /// 保存帳戶、訂單與證書的 bucket（GCS 名稱或 file:// 路徑）
    #[arg(short, long)]
    pub bucket: String,

    /// ACME 帳戶的聯絡信箱
    #[arg(short, long, value_parser = parse_email)]
    pub email: String,

    /// 要申請證書的網域，會同時涵蓋 `*.<domain>`
    #[arg(short, long, value_parser = parse_domain)]
    pub domain: String,

    /// bucket 內的路徑前綴
    #[arg(short, long)]
    pub location: Option<String>,

    /// 使用 Let's Encrypt 正式環境而非測試環境
    #[arg(long)]
    pub production: bool,

    /// 輸出除錯日誌
    #[arg(short, long)]
    pub verbose: bool,

    #[arg(long, env = "NAMECHEAP_CREDENTIALS", hide = true)]
    pub namecheap_credentials: Option<PathBuf>,
}

fn parse_email(value: &str) -> Result<String, String> {
    match value.split_once('@') {
        Some((user, host)) if !user.is_empty() && !host.is_empty() => Ok(value.to_string()),
        _ => Err(format!("'{}' is not an email address", value)),
    }
}

fn parse_domain(value: &str) -> Result<String, String> {
    let domain = value.trim_end_matches('.').to_ascii_lowercase();
    let valid = domain.contains('.')
        && domain.split('.').all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
    if valid {
        Ok(domain)
    } else {
        Err(format!("'{}' is not a domain name", value))
    }
}

/// 參數解析的結果：缺少或無效的參數視為沒有工作可做。
#[derive(Debug)]
pub enum Invocation {
    Run(Cli),
    /// `--help` 或 `--version`，交給 clap 自行輸出並結束。
    Exit(clap::Error),
    /// 參數錯誤；輸出使用說明後以狀態 0 結束。
    Usage(clap::Error),
}

impl Cli {
    /// 未設定 `RUST_LOG` 時使用的日誌等級。
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    pub fn parse_invocation<I, T>(args: I) -> Invocation
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        match Self::try_parse_from(args) {
            Ok(cli) => Invocation::Run(cli),
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                Invocation::Exit(e)
            }
            Err(e) => Invocation::Usage(e),
        }
    }
}

/// 驗證後的執行設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bucket: String,
    pub email: String,
    pub domain: String,
    pub location: Option<String>,
    pub production: bool,
    pub verbose: bool,
    pub credentials_path: PathBuf,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let credentials_path = cli
            .namecheap_credentials
            .ok_or(ConfigError::MissingCredentials(CREDENTIALS_ENV))?;

        Ok(Self {
            bucket: cli.bucket,
            email: cli.email,
            domain: cli.domain,
            location: cli.location.filter(|l| !l.trim_matches('/').is_empty()),
            production: cli.production,
            verbose: cli.verbose,
            credentials_path,
        })
    }

    pub fn directory_url(&self) -> &'static str {
        if self.production {
            LETS_ENCRYPT_PRODUCTION
        } else {
            LETS_ENCRYPT_STAGING
        }
    }
}
