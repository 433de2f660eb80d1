//! Google Cloud Storage 後端，透過 JSON API 讀寫物件。

use std::{
    env,
    sync::Mutex,
    time::{Duration, Instant},
};

use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    StatusCode, Url,
};
use serde::Deserialize;

use crate::storage::{KeyUtils, Result, Storage, StorageError};

const STORAGE_API: &str = "https://storage.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
/// 直接提供 OAuth access token 的環境變數。
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
/// token 剩餘效期低於此值時重新向 metadata server 取得。
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// access token 的來源。
#[derive(Debug, Clone)]
pub enum TokenSource {
    Static(String),
    /// GCE metadata server 的 token 端點。
    Metadata(String),
}

impl TokenSource {
    fn from_env() -> Self {
        match env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => TokenSource::Static(token),
            _ => TokenSource::Metadata(METADATA_TOKEN_URL.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// 快取的 token；`expires_at` 為 `None` 表示不會過期（固定 token）。
#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at
            .map_or(true, |expires_at| now + TOKEN_REFRESH_MARGIN < expires_at)
    }
}

#[derive(Debug)]
pub struct GcsStorage {
    client: Client,
    bucket: String,
    endpoint: String,
    token_source: TokenSource,
    token: Mutex<Option<CachedToken>>,
}

impl GcsStorage {
    /// `bucket` 可以是純名稱或 `gs://name`。
    pub fn new(bucket: &str) -> Result<Self> {
        Self::with_endpoint(bucket, STORAGE_API, TokenSource::from_env())
    }

    pub fn with_endpoint(bucket: &str, endpoint: &str, token_source: TokenSource) -> Result<Self> {
        let bucket = bucket.trim_start_matches("gs://").trim_end_matches('/');
        if bucket.is_empty() || bucket.contains('/') {
            return Err(StorageError::InvalidKey(format!(
                "Invalid bucket name: {}",
                bucket
            )));
        }

        Ok(Self {
            client: Client::new(),
            bucket: bucket.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token_source,
            token: Mutex::new(None),
        })
    }

    fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        let token = match &self.token_source {
            TokenSource::Static(token) => CachedToken {
                value: token.clone(),
                expires_at: None,
            },
            TokenSource::Metadata(url) => {
                tracing::debug!(url, "Requesting access token from metadata server");
                let response = self
                    .client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()?;
                if !response.status().is_success() {
                    return Err(StorageError::Token(format!(
                        "metadata server returned {}",
                        response.status()
                    )));
                }
                let token = response.json::<MetadataToken>()?;
                CachedToken {
                    value: token.access_token,
                    expires_at: Some(Instant::now() + Duration::from_secs(token.expires_in)),
                }
            }
        };

        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// 組出 `{endpoint}/{prefix...}/b/{bucket}/o/{segments...}`，每段都會被編碼。
    fn url(&self, prefix: &[&str], segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| StorageError::InvalidKey(format!("{}: {}", self.endpoint, e)))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidKey(self.endpoint.clone()))?
            .pop_if_empty()
            .extend(prefix)
            .extend(["b", self.bucket.as_str(), "o"])
            .extend(segments);
        Ok(url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response> {
        Ok(request.bearer_auth(self.access_token()?).send()?)
    }

    fn remote_error(key: &str, response: Response) -> StorageError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return StorageError::NotFound(key.to_string());
        }
        StorageError::Remote {
            key: key.to_string(),
            status: status.as_u16(),
            message: response.text().unwrap_or_default(),
        }
    }
}

impl Storage for GcsStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let name = KeyUtils::normalize(key)?;
        let url = self.url(&["storage", "v1"], &[&name])?;

        let response = self.send(self.client.get(url).query(&[("alt", "media")]))?;
        if !response.status().is_success() {
            return Err(Self::remote_error(key, response));
        }
        Ok(response.bytes()?.to_vec())
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let name = KeyUtils::normalize(key)?;
        let url = self.url(&["upload", "storage", "v1"], &[])?;

        tracing::debug!(bucket = %self.bucket, key = %name, "Uploading object");
        let response = self.send(
            self.client
                .post(url)
                .query(&[("uploadType", "media"), ("name", name.as_str())])
                .header("Content-Type", "application/octet-stream")
                .body(value.to_vec()),
        )?;
        if !response.status().is_success() {
            return Err(Self::remote_error(key, response));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let name = KeyUtils::normalize(key)?;
        let url = self.url(&["storage", "v1"], &[&name])?;

        let response = self.send(self.client.delete(url))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::remote_error(key, response)),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let name = KeyUtils::normalize(key)?;
        let url = self.url(&["storage", "v1"], &[&name])?;

        let response = self.send(self.client.get(url))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::remote_error(key, response)),
        }
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        let source = KeyUtils::normalize(from)?;
        let target = KeyUtils::normalize(to)?;
        let url = self.url(
            &["storage", "v1"],
            &[&source, "copyTo", "b", &self.bucket, "o", &target],
        )?;

        let response = self.send(self.client.post(url))?;
        if !response.status().is_success() {
            return Err(Self::remote_error(from, response));
        }
        Ok(())
    }
}
