use openssl::sha::sha256;
use serde::{Deserialize, Serialize};

use crate::{acme::AcmeError, base64::Base64};

/// ACME 挑戰的類型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
    #[serde(other)]
    Unknown,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Unknown => "unknown",
        }
    }
}

/// ACME 挑戰的狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

/// 伺服器回傳的挑戰物件。
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeObject {
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub url: String,
    pub status: ChallengeStatus,
    #[serde(default)]
    pub token: String,
}

/// 一個 ACME 驗證挑戰，已帶入帳戶金鑰算出的 key authorization。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub challenge_type: ChallengeType,
    pub url: String,
    pub token: String,
    pub status: ChallengeStatus,
    /// `token + "." + thumbprint`
    pub key_authorization: String,
}

impl Challenge {
    pub fn from_object(object: ChallengeObject, thumbprint: &str) -> Self {
        let key_authorization = format!("{}.{}", object.token, thumbprint);
        Self {
            challenge_type: object.challenge_type,
            url: object.url,
            token: object.token,
            status: object.status,
            key_authorization,
        }
    }

    /// DNS-01 要放進 TXT 紀錄的值：`base64url(SHA-256(key authorization))`。
    pub fn dns_txt_value(&self) -> String {
        Base64::new(sha256(self.key_authorization.as_bytes())).base64_url()
    }
}

/// 通知 ACME 伺服器開始驗證挑戰的能力，由已登入的帳戶提供。
pub trait ChallengeTrigger {
    fn trigger(&self, challenge: &Challenge) -> Result<(), AcmeError>;
}
