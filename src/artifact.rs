//! 以路徑定址的持久化資料：JSON 文件、PEM 金鑰與證書鏈。
//!
//! 路徑配置：
//!
//! ```text
//! accounts/<email>/account.json
//! accounts/<email>/keypair.pem
//! domains/<domain>/orders/order.json
//! domains/<domain>/certificates/privkey.pem
//! domains/<domain>/certificates/fullchain.pem
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{
    certificate::CertificateChain,
    key_pair::{KeyError, KeyPair},
    storage::{Storage, StorageError},
};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

type Result<T> = std::result::Result<T, ArtifactError>;

/// 帳戶與訂單只保存伺服器上的資源位址。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReference {
    pub location: String,
}

impl ResourceReference {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

pub fn account_document(email: &str) -> String {
    format!("accounts/{}/account.json", email)
}

pub fn account_key(email: &str) -> String {
    format!("accounts/{}/keypair.pem", email)
}

pub fn order_document(domain: &str) -> String {
    format!("domains/{}/orders/order.json", domain)
}

pub fn domain_key(domain: &str) -> String {
    format!("domains/{}/certificates/privkey.pem", domain)
}

pub fn certificate_chain(domain: &str) -> String {
    format!("domains/{}/certificates/fullchain.pem", domain)
}

#[derive(Debug)]
pub struct ArtifactStore {
    storage: Box<dyn Storage>,
    prefix: String,
}

impl ArtifactStore {
    /// `prefix` 為 bucket 內的子路徑，可為空。
    pub fn new(storage: Box<dyn Storage>, prefix: Option<&str>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .unwrap_or_default();
        Self { storage, prefix }
    }

    fn key(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    /// 讀取原始位元組；不存在時回傳 `None`，其他儲存錯誤照常回傳。
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.storage.read_file(&self.key(path)) {
            Ok(data) => Ok(Some(data)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 讀取 JSON 文件；不存在或無法解析時回傳 `None`。
    pub fn load<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(data) = self.read(path)? else {
            return Ok(None);
        };

        match serde_json::from_slice(&data) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(path, error = %e, "Ignoring unreadable document");
                Ok(None)
            }
        }
    }

    pub fn save<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        self.storage.write_file(&self.key(path), &data)?;
        tracing::debug!(path, "Saved document");
        Ok(())
    }

    /// 讀取 PEM 私鑰；不存在或無法解析時回傳 `None`。
    pub fn load_key_pair(&self, path: &str) -> Result<Option<KeyPair>> {
        let Some(data) = self.read(path)? else {
            return Ok(None);
        };

        match KeyPair::from_pem(&data) {
            Ok(key_pair) => Ok(Some(key_pair)),
            Err(e) => {
                tracing::warn!(path, error = %e, "Ignoring unreadable key pair");
                Ok(None)
            }
        }
    }

    pub fn save_key_pair(&self, path: &str, key_pair: &KeyPair) -> Result<()> {
        self.storage.write_file(&self.key(path), &key_pair.to_pem()?)?;
        tracing::debug!(path, "Saved key pair");
        Ok(())
    }

    pub fn load_certificate_chain(&self, path: &str) -> Result<Option<CertificateChain>> {
        Ok(self
            .read(path)?
            .and_then(|data| String::from_utf8(data).ok())
            .map(CertificateChain::new))
    }

    pub fn save_certificate_chain(&self, path: &str, chain: &CertificateChain) -> Result<()> {
        self.storage
            .write_file(&self.key(path), chain.as_pem().as_bytes())?;
        tracing::info!(path, "Saved certificate chain");
        Ok(())
    }

    pub fn copy(&self, from: &str, to: &str) -> Result<()> {
        Ok(self.storage.copy(&self.key(from), &self.key(to))?)
    }

    /// 刪除路徑，回傳刪除前是否存在。
    pub fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.storage.remove(&self.key(path))?)
    }

    pub fn move_to(&self, from: &str, to: &str) -> Result<()> {
        Ok(self.storage.rename(&self.key(from), &self.key(to))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    #[test]
    fn test_document_under_prefix() -> Result<()> {
        let storage = MemStorage::new();
        let store = ArtifactStore::new(Box::new(storage.clone()), Some("/prod/"));

        let reference = ResourceReference::new("https://acme.test/acct/1");
        store.save(&account_document("admin@example.com"), &reference)?;

        assert_eq!(
            storage.keys()?,
            vec!["prod/accounts/admin@example.com/account.json".to_string()]
        );
        assert_eq!(
            store.load::<ResourceReference>(&account_document("admin@example.com"))?,
            Some(reference)
        );
        Ok(())
    }

    #[test]
    fn test_missing_and_corrupt_are_absent() -> Result<()> {
        let storage = MemStorage::new();
        let store = ArtifactStore::new(Box::new(storage.clone()), None);

        assert!(store
            .load::<ResourceReference>(&order_document("example.com"))?
            .is_none());

        storage.write_file(&order_document("example.com"), b"not json")?;
        assert!(store
            .load::<ResourceReference>(&order_document("example.com"))?
            .is_none());

        storage.write_file(&domain_key("example.com"), b"not a key")?;
        assert!(store.load_key_pair(&domain_key("example.com"))?.is_none());
        Ok(())
    }

    #[test]
    fn test_invalid_key_is_error() {
        let store = ArtifactStore::new(Box::new(MemStorage::new()), None);
        assert!(store.load::<ResourceReference>("../x.json").is_err());
    }

    #[test]
    fn test_key_pair_round_trip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let store = ArtifactStore::new(Box::new(MemStorage::new()), None);
        let key_pair = KeyPair::generate_rsa(2048)?;

        store.save_key_pair(&account_key("a@b.c"), &key_pair)?;
        let loaded = store
            .load_key_pair(&account_key("a@b.c"))?
            .ok_or("key pair missing")?;

        assert!(loaded.same_key(&key_pair));
        Ok(())
    }

    #[test]
    fn test_copy_move_delete() -> Result<()> {
        let storage = MemStorage::new();
        let store = ArtifactStore::new(Box::new(storage.clone()), None);
        let chain = CertificateChain::new("PEM");

        store.save_certificate_chain(&certificate_chain("example.com"), &chain)?;
        store.copy(&certificate_chain("example.com"), "backup/fullchain.pem")?;
        store.move_to("backup/fullchain.pem", "archive/fullchain.pem")?;

        assert_eq!(
            store.load_certificate_chain("archive/fullchain.pem")?,
            Some(chain)
        );
        assert!(store.delete("archive/fullchain.pem")?);
        assert!(!store.delete("archive/fullchain.pem")?);
        assert_eq!(
            storage.keys()?,
            vec!["domains/example.com/certificates/fullchain.pem".to_string()]
        );
        Ok(())
    }
}
