//! ACME 帳戶的登入與建立。
//!
//! 帳戶只在本地保存伺服器給的帳戶 URL 與帳戶私鑰，兩者都存在時即可直接登入，
//! 不需要和伺服器往返。

use thiserror::Error;

use crate::{
    acme::{AcmeApi, AcmeError},
    artifact::{account_document, account_key, ArtifactError, ArtifactStore, ResourceReference},
    key_pair::{KeyError, KeyPair, KeyPairGenerator},
};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Storage error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("ACME error: {0}")]
    Acme(#[from] AcmeError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

pub type Result<T> = std::result::Result<T, AccountError>;

/// 已綁定金鑰的 ACME 帳戶。
#[derive(Debug, Clone)]
pub struct Account {
    pub email: String,
    /// 伺服器上的帳戶 URL，簽署請求時作為 `kid`。
    pub url: String,
    pub key_pair: KeyPair,
}

pub struct AccountManager<'a> {
    api: &'a dyn AcmeApi,
    store: &'a ArtifactStore,
    keys: &'a dyn KeyPairGenerator,
}

impl<'a> AccountManager<'a> {
    pub fn new(
        api: &'a dyn AcmeApi,
        store: &'a ArtifactStore,
        keys: &'a dyn KeyPairGenerator,
    ) -> Self {
        Self { api, store, keys }
    }

    /// 讀取已保存的帳戶；帳戶文件或金鑰任一缺少或損壞時回傳 `None`。
    pub fn login(&self, email: &str) -> Result<Option<Account>> {
        let reference = self
            .store
            .load::<ResourceReference>(&account_document(email))?;
        let key_pair = self.store.load_key_pair(&account_key(email))?;

        Ok(match (reference, key_pair) {
            (Some(reference), Some(key_pair)) => Some(Account {
                email: email.to_string(),
                url: reference.location,
                key_pair,
            }),
            _ => None,
        })
    }

    /// 產生新金鑰、註冊帳戶並保存。
    pub fn create_account(&self, email: &str) -> Result<Account> {
        let key_pair = self.keys.generate()?;
        let url = self.api.new_account(email, &key_pair)?;

        self.store.save_key_pair(&account_key(email), &key_pair)?;
        self.store
            .save(&account_document(email), &ResourceReference::new(url.clone()))?;

        Ok(Account {
            email: email.to_string(),
            url,
            key_pair,
        })
    }

    pub fn login_or_create(&self, email: &str) -> Result<Account> {
        tracing::info!(email, "Logging in");
        match self.login(email)? {
            Some(account) => {
                tracing::debug!(email, account = %account.url, "Logged in with existing account");
                Ok(account)
            }
            None => {
                tracing::debug!(email, "Account not found, creating");
                let account = self.create_account(email)?;
                tracing::debug!(email, account = %account.url, "Account created");
                Ok(account)
            }
        }
    }
}
