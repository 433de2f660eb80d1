use chrono::{DateTime, Duration, Utc};
use openssl::{asn1::Asn1Time, x509::X509};
use thiserror::Error;

/// 到期前多少天開放續約。
pub const RENEWAL_WINDOW_DAYS: i64 = 30;

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Certificate chain is empty")]
    EmptyChain,
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

type Result<T> = std::result::Result<T, CertificateError>;

/// ACME 伺服器簽發的 PEM 證書鏈，第一張為網域證書。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    pem: String,
}

impl CertificateChain {
    pub fn new(pem: impl Into<String>) -> Self {
        Self { pem: pem.into() }
    }

    pub fn as_pem(&self) -> &str {
        &self.pem
    }

    fn leaf(&self) -> Result<X509> {
        X509::stack_from_pem(self.pem.as_bytes())?
            .into_iter()
            .next()
            .ok_or(CertificateError::EmptyChain)
    }

    /// 網域證書的到期時間。
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        let leaf = self.leaf()?;
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(leaf.not_after())?;
        let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);

        DateTime::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidTimestamp)
    }
}

/// 判斷在 `now` 時是否已進入續約期間（到期前 30 天內，或已過期）。
pub fn renewal_window_open(not_after: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    not_after - now < Duration::days(RENEWAL_WINDOW_DAYS)
}
