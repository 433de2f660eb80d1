//! 帳戶公鑰的 JWK 表示，用於 JWS 標頭與 thumbprint。

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

#[derive(Debug, Error)]
pub enum JwkError {
    #[error("Key type '{0}' cannot be expressed as a JWK")]
    UnsupportedKeyType(String),
    #[error("Public key is not RSA: {0}")]
    NotRsa(#[from] openssl::error::ErrorStack),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 以 `kty` 區分的公鑰；目前只有 RSA。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "RSA")]
    Rsa { n: String, e: String },
}

impl Jwk {
    pub fn from_key_pair(key_pair: &KeyPair) -> Result<Self, JwkError> {
        if key_pair.alg_name != "RSA" {
            return Err(JwkError::UnsupportedKeyType(key_pair.alg_name.clone()));
        }

        let rsa = key_pair.pub_key.rsa()?;
        Ok(Jwk::Rsa {
            n: Base64::new(rsa.n().to_vec()).base64_url(),
            e: Base64::new(rsa.e().to_vec()).base64_url(),
        })
    }

    /// RFC 7638 的 thumbprint 輸入：只含必要成員、依字典序、無空白。
    pub fn canonical_json(&self) -> Result<String, JwkError> {
        let value = match self {
            Jwk::Rsa { n, e } => json!({ "e": e, "kty": "RSA", "n": n }),
        };
        Ok(serde_json::to_string(&value)?)
    }
}
