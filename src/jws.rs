//! 此模組提供 ACME 請求主體使用的 JSON Web Signature (JWS) 結構，
//! 以 flattened JSON 序列化格式輸出。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::base64::Base64;

/// 一個 flattened JWS 物件，三個欄位皆為 URL-safe Base64 字串。
#[derive(Serialize, Deserialize, Debug)]
pub struct Jws {
    #[serde(rename = "protected")]
    header: String,
    payload: String,
    signature: String,
}

#[derive(Error, Debug)]
pub enum JwsError {
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Jws {
    pub fn new(header_b64: &Base64, payload_b64: &Base64, signature_b64: &Base64) -> Self {
        Jws {
            header: header_b64.base64_url(),
            payload: payload_b64.base64_url(),
            signature: signature_b64.base64_url(),
        }
    }

    /// 將 `Jws` 序列化為請求主體。
    pub fn to_json(&self) -> Result<String, JwsError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_as_get_has_empty_payload() -> Result<(), JwsError> {
        let jws = Jws::new(&Base64::new("{}"), &Base64::new(""), &Base64::new("sig"));
        let json: serde_json::Value = serde_json::from_str(&jws.to_json()?)?;
        assert_eq!(json["payload"], "");
        assert_eq!(json["protected"], "e30");
        Ok(())
    }
}
