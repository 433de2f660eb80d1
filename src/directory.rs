use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 表示處理目錄操作時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Directory request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
}

type Result<T> = std::result::Result<T, DirectoryError>;

/// Let's Encrypt 測試環境的目錄。
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 正式環境的目錄。
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// ACME 伺服器公佈的各項資源位址。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Directory {
    #[serde(rename = "newAccount")]
    pub new_account: String,
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    #[serde(rename = "newOrder")]
    pub new_order: String,
    #[serde(rename = "revokeCert", default)]
    pub revoke_cert: Option<String>,
    #[serde(rename = "keyChange", default)]
    pub key_change: Option<String>,
}

impl Directory {
    /// 從 ACME 伺服器下載目錄。
    pub fn fetch(client: &Client, url: &str) -> Result<Self> {
        tracing::debug!(url, "Fetching ACME directory");
        let response = client.get(url).send()?;

        if !response.status().is_success() {
            return Err(DirectoryError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(serde_json::from_str(&response.text()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_directory() -> Result<()> {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/directory")
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "newAccount": "https://acme.test/new-acct",
                    "newNonce": "https://acme.test/new-nonce",
                    "newOrder": "https://acme.test/new-order",
                    "meta": {"termsOfService": "https://acme.test/tos"}
                }"#,
            )
            .create();

        let directory = Directory::fetch(&Client::new(), &format!("{}/directory", server.url()))?;
        assert_eq!(directory.new_nonce, "https://acme.test/new-nonce");
        assert!(directory.revoke_cert.is_none());
        Ok(())
    }

    #[test]
    fn test_fetch_directory_error_status() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/directory").with_status(503).create();

        let result = Directory::fetch(&Client::new(), &format!("{}/directory", server.url()));
        assert!(matches!(result, Err(DirectoryError::Status { status: 503, .. })));
    }
}
