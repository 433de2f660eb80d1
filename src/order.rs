use serde::Deserialize;
use thiserror::Error;

use crate::{
    account::Account,
    acme::{AcmeApi, AcmeError, PollOutcome},
    artifact::{
        certificate_chain, domain_key, order_document, ArtifactError, ArtifactStore,
        ResourceReference,
    },
    certificate::CertificateChain,
    clock::{Clock, Interrupted, POLL_INTERVAL},
    csr::{CsrError, CSR},
    key_pair::{KeyError, KeyPairGenerator},
    payload::Identifier,
};

/// 定義所有訂單操作可能產生的錯誤。
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order {0} is invalid")]
    OrderInvalid(String),
    #[error("ACME error: {0}")]
    Acme(#[from] AcmeError),
    #[error("Storage error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("Key pair error: {0}")]
    KeyPair(#[from] KeyError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

type Result<T> = std::result::Result<T, OrderError>;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

/// ACME 訂單。`url` 不在回應內容中，由呼叫端依 Location 補上。
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Order {
    #[serde(skip)]
    pub url: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub authorizations: Vec<String>,
    pub finalize: String,
    #[serde(default)]
    pub certificate: Option<String>,
}

/// 伺服器明確表示訂單不存在或不屬於此帳戶；其他錯誤（5xx、rateLimited 等）可能只是暫時的。
fn is_unbindable(error: &AcmeError) -> bool {
    match error {
        AcmeError::Problem { status, kind, .. } => {
            matches!(status, 403 | 404)
                || kind.ends_with(":malformed")
                || kind.ends_with(":unauthorized")
        }
        _ => false,
    }
}

/// 網域本身與其萬用字元子網域。
pub fn order_domains(domain: &str) -> Vec<String> {
    vec![domain.to_string(), format!("*.{}", domain)]
}

pub struct OrderCoordinator<'a> {
    api: &'a dyn AcmeApi,
    store: &'a ArtifactStore,
    keys: &'a dyn KeyPairGenerator,
    clock: &'a dyn Clock,
}

impl<'a> OrderCoordinator<'a> {
    pub fn new(
        api: &'a dyn AcmeApi,
        store: &'a ArtifactStore,
        keys: &'a dyn KeyPairGenerator,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            api,
            store,
            keys,
            clock,
        }
    }

    /// 讀取已保存的訂單並向伺服器取得目前狀態。
    ///
    /// 伺服器拒絕或訂單已是 `invalid` 時視為不存在，並刪除過期的參照。
    pub fn get_order(&self, account: &Account, domain: &str) -> Result<Option<Order>> {
        let path = order_document(domain);
        let Some(reference) = self.store.load::<ResourceReference>(&path)? else {
            return Ok(None);
        };

        match self.bind(account, &reference.location) {
            Ok(order) if order.status == OrderStatus::Invalid => {
                tracing::warn!(domain, order = %order.url, "Stored order is invalid, discarding");
            }
            Ok(order) => return Ok(Some(order)),
            Err(OrderError::Acme(e)) if is_unbindable(&e) => {
                tracing::warn!(domain, order = %reference.location, error = %e, "Stored order could not be bound, discarding");
            }
            Err(e) => return Err(e),
        }

        self.store.delete(&path)?;
        Ok(None)
    }

    /// 為網域與萬用字元網域建立新訂單，並保存其參照。
    pub fn create_order(&self, account: &Account, domain: &str) -> Result<Order> {
        let order = self.api.new_order(account, &order_domains(domain))?;
        self.store
            .save(&order_document(domain), &ResourceReference::new(order.url.clone()))?;
        Ok(order)
    }

    pub fn get_or_create_order(&self, account: &Account, domain: &str) -> Result<Order> {
        tracing::debug!(domain, "Fetching order");
        match self.get_order(account, domain)? {
            Some(order) => {
                tracing::info!(domain, status = ?order.status, "Found order");
                Ok(order)
            }
            None => {
                tracing::info!(domain, "Creating order");
                let order = self.create_order(account, domain)?;
                tracing::debug!(domain, order = %order.url, "Order created");
                Ok(order)
            }
        }
    }

    /// 送出 CSR（若尚未送出）、輪詢至最終狀態，並保存簽發的證書鏈。
    ///
    /// 已是 `valid` 的訂單不會再產生 CSR 或輪詢。沒有證書 URL 時回傳 `None`。
    pub fn finalize_order(
        &self,
        account: &Account,
        order: &Order,
        domain: &str,
    ) -> Result<Option<CertificateChain>> {
        let mut current = match order.status {
            OrderStatus::Pending | OrderStatus::Ready => self.submit_csr(account, order, domain)?,
            OrderStatus::Processing | OrderStatus::Valid => order.clone(),
            OrderStatus::Invalid => return Err(OrderError::OrderInvalid(order.url.clone())),
        };

        while !current.status.is_terminal() {
            tracing::info!(domain, "Finalization in progress");
            self.clock.sleep(POLL_INTERVAL)?;
            match self.api.fetch_order(account, &current.url)? {
                PollOutcome::Updated(updated) => current = updated,
                PollOutcome::RetryLater => {}
            }
        }

        if current.status == OrderStatus::Invalid {
            return Err(OrderError::OrderInvalid(current.url));
        }
        tracing::debug!(domain, status = ?current.status, "Order finished");

        let Some(certificate_url) = current.certificate.as_deref() else {
            tracing::warn!(domain, "Valid order has no certificate URL");
            return Ok(None);
        };

        let chain = self.api.download_certificate(account, certificate_url)?;
        self.store
            .save_certificate_chain(&certificate_chain(domain), &chain)?;
        Ok(Some(chain))
    }

    fn submit_csr(&self, account: &Account, order: &Order, domain: &str) -> Result<Order> {
        let path = domain_key(domain);
        let key_pair = match self.store.load_key_pair(&path)? {
            Some(key_pair) => key_pair,
            None => self.keys.generate()?,
        };

        let csr = CSR::for_domain(domain).build_der(&key_pair)?;
        self.store.save_key_pair(&path, &key_pair)?;

        let mut finalized = self.api.finalize_order(account, &order.finalize, &csr)?;
        if finalized.url.is_empty() {
            finalized.url = order.url.clone();
        }
        Ok(finalized)
    }

    /// 依 URL 取得訂單，伺服器要求稍後再試時等待後重試。
    fn bind(&self, account: &Account, url: &str) -> Result<Order> {
        loop {
            match self.api.fetch_order(account, url)? {
                PollOutcome::Updated(order) => return Ok(order),
                PollOutcome::RetryLater => self.clock.sleep(POLL_INTERVAL)?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        clock::ManualClock,
        storage::{MemStorage, Storage},
        testing::{account, order, FixedKeys, ScriptedAcme},
    };

    struct Fixture {
        storage: MemStorage,
        store: ArtifactStore,
        acme: ScriptedAcme,
        keys: FixedKeys,
        clock: ManualClock,
        account: Account,
    }

    impl Fixture {
        fn new() -> std::result::Result<Self, Box<dyn std::error::Error>> {
            let storage = MemStorage::new();
            let keys = FixedKeys::new()?;
            Ok(Self {
                store: ArtifactStore::new(Box::new(storage.clone()), None),
                storage,
                acme: ScriptedAcme::default(),
                account: account(keys.key_pair()),
                keys,
                clock: ManualClock::new(Utc::now()),
            })
        }

        fn coordinator(&self) -> OrderCoordinator<'_> {
            OrderCoordinator::new(&self.acme, &self.store, &self.keys, &self.clock)
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let f = Fixture::new()?;
        f.acme.set_new_order(order("https://acme.test/order/1", OrderStatus::Pending));

        let first = f.coordinator().get_or_create_order(&f.account, "example.com")?;
        let second = f.coordinator().get_or_create_order(&f.account, "example.com")?;

        assert_eq!(first.url, second.url);
        assert_eq!(f.acme.orders_created(), vec![order_domains("example.com")]);
        Ok(())
    }

    #[test]
    fn test_stale_reference_is_replaced() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let f = Fixture::new()?;
        f.store.save(
            &order_document("example.com"),
            &ResourceReference::new("https://acme.test/order/gone"),
        )?;
        f.acme.set_new_order(order("https://acme.test/order/2", OrderStatus::Pending));

        let order = f.coordinator().get_or_create_order(&f.account, "example.com")?;

        assert_eq!(order.url, "https://acme.test/order/2");
        let saved = f
            .store
            .load::<ResourceReference>(&order_document("example.com"))?;
        assert_eq!(saved, Some(ResourceReference::new("https://acme.test/order/2")));
        Ok(())
    }

    #[test]
    fn test_invalid_order_is_stale() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let f = Fixture::new()?;
        f.store.save(
            &order_document("example.com"),
            &ResourceReference::new("https://acme.test/order/1"),
        )?;
        f.acme.push_order(
            "https://acme.test/order/1",
            PollOutcome::Updated(order("https://acme.test/order/1", OrderStatus::Invalid)),
        );

        assert!(f.coordinator().get_order(&f.account, "example.com")?.is_none());
        assert!(!f.storage.exists(&order_document("example.com"))?);
        Ok(())
    }

    #[test]
    fn test_unauthorized_order_is_stale() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let f = Fixture::new()?;
        f.store.save(
            &order_document("example.com"),
            &ResourceReference::new("https://acme.test/order/1"),
        )?;
        f.acme.fail_order(
            "https://acme.test/order/1",
            403,
            "urn:ietf:params:acme:error:unauthorized",
        );

        assert!(f.coordinator().get_order(&f.account, "example.com")?.is_none());
        assert!(!f.storage.exists(&order_document("example.com"))?);
        Ok(())
    }

    #[test]
    fn test_transient_server_error_keeps_reference(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let f = Fixture::new()?;
        f.store.save(
            &order_document("example.com"),
            &ResourceReference::new("https://acme.test/order/1"),
        )?;

        for (status, kind) in [
            (503, "urn:ietf:params:acme:error:serverInternal"),
            (429, "urn:ietf:params:acme:error:rateLimited"),
        ] {
            f.acme.fail_order("https://acme.test/order/1", status, kind);
            let result = f.coordinator().get_or_create_order(&f.account, "example.com");

            assert!(matches!(
                result,
                Err(OrderError::Acme(AcmeError::Problem { status: s, .. })) if s == status
            ));
            assert!(f.storage.exists(&order_document("example.com"))?);
        }
        assert!(f.acme.orders_created().is_empty());
        Ok(())
    }

    #[test]
    fn test_finalize_pending_order() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let f = Fixture::new()?;
        let pending = order("https://acme.test/order/1", OrderStatus::Pending);
        f.acme.set_finalized(order("", OrderStatus::Processing));
        f.acme.push_order("https://acme.test/order/1", PollOutcome::RetryLater);
        let mut valid = order("https://acme.test/order/1", OrderStatus::Valid);
        valid.certificate = Some("https://acme.test/cert/1".to_string());
        f.acme.push_order("https://acme.test/order/1", PollOutcome::Updated(valid));
        f.acme.set_certificate(CertificateChain::new("CHAIN"));

        let chain = f.coordinator().finalize_order(&f.account, &pending, "example.com")?;

        assert_eq!(chain, Some(CertificateChain::new("CHAIN")));
        assert_eq!(f.acme.csrs_submitted(), 1);
        assert_eq!(f.clock.sleeps().len(), 2);
        assert_eq!(
            f.storage.read_file(&certificate_chain("example.com"))?,
            b"CHAIN"
        );
        assert!(f.storage.exists(&domain_key("example.com"))?);
        Ok(())
    }

    #[test]
    fn test_finalize_reuses_domain_key() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let f = Fixture::new()?;
        let existing = crate::key_pair::KeyPair::generate_rsa(2048)?;
        f.store.save_key_pair(&domain_key("example.com"), &existing)?;
        f.acme.set_finalized(order("https://acme.test/order/1", OrderStatus::Valid));

        let ready = order("https://acme.test/order/1", OrderStatus::Ready);
        let chain = f.coordinator().finalize_order(&f.account, &ready, "example.com")?;

        assert!(chain.is_none());
        assert_eq!(f.keys.generated(), 0);
        let stored = f
            .store
            .load_key_pair(&domain_key("example.com"))?
            .ok_or("domain key missing")?;
        assert!(stored.same_key(&existing));
        Ok(())
    }

    #[test]
    fn test_finalize_valid_order_is_idempotent(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let f = Fixture::new()?;
        let mut valid = order("https://acme.test/order/1", OrderStatus::Valid);
        valid.certificate = Some("https://acme.test/cert/1".to_string());
        f.acme.set_certificate(CertificateChain::new("CHAIN"));

        f.coordinator().finalize_order(&f.account, &valid, "example.com")?;

        assert_eq!(f.acme.csrs_submitted(), 0);
        assert!(f.clock.sleeps().is_empty());
        assert!(!f.storage.exists(&domain_key("example.com"))?);
        Ok(())
    }

    #[test]
    fn test_finalize_reaching_invalid_is_error(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let f = Fixture::new()?;
        f.acme.push_order(
            "https://acme.test/order/1",
            PollOutcome::Updated(order("https://acme.test/order/1", OrderStatus::Invalid)),
        );

        let processing = order("https://acme.test/order/1", OrderStatus::Processing);
        let result = f.coordinator().finalize_order(&f.account, &processing, "example.com");

        assert!(matches!(result, Err(OrderError::OrderInvalid(_))));
        assert_eq!(f.acme.csrs_submitted(), 0);
        Ok(())
    }
}
