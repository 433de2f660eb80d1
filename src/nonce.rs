use std::sync::Mutex;

use reqwest::blocking::{Client, Response};
use thiserror::Error;

/// ACME 伺服器回傳 nonce 的標頭名稱。
pub const REPLAY_NONCE: &str = "Replay-Nonce";

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Error, Debug)]
pub enum NonceError {
    #[error("Failed to make request: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::ToStrError),
}

/// 定義取得 Nonce 的行為。
pub trait NonceT: Send + Sync {
    /// 取得一個尚未使用過的 nonce。
    fn get(&self) -> Result<String, NonceError>;

    /// 保存伺服器在回應中附帶的下一個 nonce。
    fn store(&self, _nonce: String) {}
}

/// 優先使用上一次回應附帶的 `Replay-Nonce`，沒有時才對 newNonce 發出 HEAD 請求。
#[derive(Debug)]
pub struct Nonce {
    client: Client,
    url: String,
    cached: Mutex<Option<String>>,
}

impl Nonce {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Nonce {
            client,
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    /// 從回應標頭擷取 nonce 並快取。
    pub fn remember(&self, response: &Response) {
        if let Some(value) = response.headers().get(REPLAY_NONCE) {
            if let Ok(nonce) = value.to_str() {
                self.store(nonce.to_string());
            }
        }
    }

    fn take_cached(&self) -> Option<String> {
        self.cached.lock().ok().and_then(|mut cached| cached.take())
    }
}

impl NonceT for Nonce {
    fn get(&self) -> Result<String, NonceError> {
        if let Some(nonce) = self.take_cached() {
            return Ok(nonce);
        }

        tracing::debug!(url = %self.url, "Requesting fresh nonce");
        let response = self.client.head(&self.url).send()?;

        match response.headers().get(REPLAY_NONCE) {
            Some(nonce) => Ok(nonce.to_str()?.to_string()),
            None => Err(NonceError::NoNonceHeader),
        }
    }

    fn store(&self, nonce: String) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(nonce);
        }
    }
}

/// 固定回傳同一個 nonce，供測試使用。
#[derive(Debug, Clone)]
pub struct MockNonce {
    value: String,
}

impl MockNonce {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl NonceT for MockNonce {
    fn get(&self) -> Result<String, NonceError> {
        Ok(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_nonce() -> Result<(), NonceError> {
        let nonce = MockNonce::new("test-nonce-123");
        assert_eq!(nonce.get()?, "test-nonce-123");
        Ok(())
    }

    #[test]
    fn test_cached_nonce_used_once() -> Result<(), NonceError> {
        let mut server = mockito::Server::new();
        let head = server
            .mock("HEAD", "/new-nonce")
            .with_header(REPLAY_NONCE, "fresh")
            .expect(1)
            .create();

        let nonce = Nonce::new(Client::new(), format!("{}/new-nonce", server.url()));
        nonce.store("cached".to_string());

        assert_eq!(nonce.get()?, "cached");
        assert_eq!(nonce.get()?, "fresh");
        head.assert();
        Ok(())
    }

    #[test]
    fn test_missing_header() {
        let mut server = mockito::Server::new();
        let _head = server.mock("HEAD", "/new-nonce").create();

        let nonce = Nonce::new(Client::new(), format!("{}/new-nonce", server.url()));
        assert!(matches!(nonce.get(), Err(NonceError::NoNonceHeader)));
    }
}
