use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::{
    base64::Base64,
    nonce::{NonceError, NonceT},
};

/// 定義保護標頭建立時可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
}

type Result<T> = std::result::Result<T, ProtectionError>;

/// 簽署者的身分：尚未註冊時附上 JWK，註冊後改用帳戶 URL（kid）。
#[derive(Debug, Clone)]
pub enum Signer {
    Jwk(JsonValue),
    Kid(String),
}

/// 用於產生 JWS 保護標頭的建構器。
pub struct Protection<'a> {
    nonce: &'a dyn NonceT,
    alg: &'static str,
    signer: Option<Signer>,
}

/// JWS 的保護標頭。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    alg: &'static str,
    nonce: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    pub fn to_base64(&self) -> Result<Base64> {
        Ok(Base64::new(serde_json::to_string(self)?))
    }
}

impl<'a> Protection<'a> {
    /// 建立保護標頭建構器，目前所有金鑰皆為 RSA，因此演算法固定為 `RS256`。
    pub fn new(nonce: &'a dyn NonceT) -> Self {
        Self {
            nonce,
            alg: "RS256",
            signer: None,
        }
    }

    /// 以 JWK 表示簽署者，值會先序列化為 JSON 物件。
    pub fn with_jwk<T: Serialize>(mut self, jwk: T) -> Result<Self> {
        self.signer = Some(Signer::Jwk(serde_json::to_value(jwk)?));
        Ok(self)
    }

    /// 以帳戶 URL 表示簽署者。
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.signer = Some(Signer::Kid(kid.into()));
        self
    }

    /// 取得新的 nonce 並組出指定 URL 的保護標頭。
    pub fn create_header(&self, url: impl Into<String>) -> Result<ProtectedHeader> {
        let nonce = self.nonce.get()?;

        let (jwk, kid) = match &self.signer {
            Some(Signer::Jwk(value)) => (Some(value.clone()), None),
            Some(Signer::Kid(kid)) => (None, Some(kid.clone())),
            None => (None, None),
        };

        Ok(ProtectedHeader {
            alg: self.alg,
            nonce,
            url: url.into(),
            jwk,
            kid,
        })
    }
}
