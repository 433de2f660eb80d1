//! 單元測試共用的假 ACME 伺服器與固定金鑰。

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use crate::{
    account::Account,
    acme::{AcmeApi, AcmeError, PollOutcome, Result},
    authorization::Authorization,
    certificate::CertificateChain,
    key_pair::{KeyError, KeyPair, KeyPairGenerator},
    order::{Order, OrderStatus},
};

pub(crate) const AUTHORIZATION_URL: &str = "https://acme.test/authz/1";

pub(crate) fn account(key_pair: KeyPair) -> Account {
    Account {
        email: "admin@example.com".to_string(),
        url: "https://acme.test/acct/1".to_string(),
        key_pair,
    }
}

pub(crate) fn order(url: &str, status: OrderStatus) -> Order {
    Order {
        url: url.to_string(),
        status,
        identifiers: Vec::new(),
        authorizations: Vec::new(),
        finalize: "https://acme.test/finalize/1".to_string(),
        certificate: None,
    }
}

fn not_found(url: &str) -> AcmeError {
    AcmeError::Problem {
        status: 404,
        kind: "urn:ietf:params:acme:error:malformed".to_string(),
        detail: format!("{} not found", url),
    }
}

/// 依 URL 排隊的回應；最後一筆會一直重複回傳。
struct Script<T>(Mutex<HashMap<String, VecDeque<T>>>);

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self(Mutex::new(HashMap::new()))
    }
}

impl<T: Clone> Script<T> {
    fn push(&self, url: &str, item: T) {
        if let Ok(mut queues) = self.0.lock() {
            queues.entry(url.to_string()).or_default().push_back(item);
        }
    }

    fn next(&self, url: &str) -> Option<T> {
        let mut queues = self.0.lock().ok()?;
        let queue = queues.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// 以預先排好的回應模擬 ACME 伺服器，並記錄收到的請求。
#[derive(Default)]
pub(crate) struct ScriptedAcme {
    orders: Script<PollOutcome<Order>>,
    order_failures: Mutex<HashMap<String, (u16, String)>>,
    authorizations: Script<PollOutcome<Authorization>>,
    new_order: Mutex<Option<Order>>,
    finalized: Mutex<Option<Order>>,
    certificate: Mutex<Option<CertificateChain>>,
    accounts: Mutex<usize>,
    ordered: Mutex<Vec<Vec<String>>>,
    csrs: Mutex<usize>,
    triggered: Mutex<Vec<String>>,
}

fn bump(counter: &Mutex<usize>) {
    if let Ok(mut count) = counter.lock() {
        *count += 1;
    }
}

fn read<T: Clone + Default>(value: &Mutex<T>) -> T {
    value.lock().map(|v| v.clone()).unwrap_or_default()
}

impl ScriptedAcme {
    pub(crate) fn push_order(&self, url: &str, outcome: PollOutcome<Order>) {
        self.orders.push(url, outcome);
    }

    /// 讓 `url` 的訂單查詢回傳指定的 problem 文件。
    pub(crate) fn fail_order(&self, url: &str, status: u16, kind: &str) {
        if let Ok(mut failures) = self.order_failures.lock() {
            failures.insert(url.to_string(), (status, kind.to_string()));
        }
    }

    pub(crate) fn push_authorization(&self, outcome: PollOutcome<Authorization>) {
        self.push_authorization_for(AUTHORIZATION_URL, outcome);
    }

    pub(crate) fn push_authorization_for(&self, url: &str, outcome: PollOutcome<Authorization>) {
        self.authorizations.push(url, outcome);
    }

    /// 設定 `new_order` 的回應，同時讓該訂單 URL 可被查詢。
    pub(crate) fn set_new_order(&self, order: Order) {
        self.push_order(&order.url, PollOutcome::Updated(order.clone()));
        if let Ok(mut slot) = self.new_order.lock() {
            *slot = Some(order);
        }
    }

    pub(crate) fn set_finalized(&self, order: Order) {
        if let Ok(mut slot) = self.finalized.lock() {
            *slot = Some(order);
        }
    }

    pub(crate) fn set_certificate(&self, chain: CertificateChain) {
        if let Ok(mut slot) = self.certificate.lock() {
            *slot = Some(chain);
        }
    }

    pub(crate) fn accounts_created(&self) -> usize {
        read(&self.accounts)
    }

    pub(crate) fn orders_created(&self) -> Vec<Vec<String>> {
        read(&self.ordered)
    }

    pub(crate) fn csrs_submitted(&self) -> usize {
        read(&self.csrs)
    }

    pub(crate) fn triggered(&self) -> Vec<String> {
        read(&self.triggered)
    }
}

impl AcmeApi for ScriptedAcme {
    fn new_account(&self, _email: &str, _key_pair: &KeyPair) -> Result<String> {
        bump(&self.accounts);
        Ok(format!("https://acme.test/acct/{}", self.accounts_created()))
    }

    fn new_order(&self, _account: &Account, domains: &[String]) -> Result<Order> {
        if let Ok(mut ordered) = self.ordered.lock() {
            ordered.push(domains.to_vec());
        }
        read(&self.new_order).ok_or_else(|| not_found("new-order"))
    }

    fn fetch_order(&self, _account: &Account, url: &str) -> Result<PollOutcome<Order>> {
        let failure = self
            .order_failures
            .lock()
            .ok()
            .and_then(|failures| failures.get(url).cloned());
        if let Some((status, kind)) = failure {
            return Err(AcmeError::Problem {
                status,
                kind,
                detail: format!("{} failed", url),
            });
        }
        self.orders.next(url).ok_or_else(|| not_found(url))
    }

    fn fetch_authorization(
        &self,
        _account: &Account,
        url: &str,
    ) -> Result<PollOutcome<Authorization>> {
        self.authorizations.next(url).ok_or_else(|| not_found(url))
    }

    fn trigger_challenge(&self, _account: &Account, url: &str) -> Result<()> {
        if let Ok(mut triggered) = self.triggered.lock() {
            triggered.push(url.to_string());
        }
        Ok(())
    }

    fn finalize_order(
        &self,
        _account: &Account,
        finalize_url: &str,
        _csr_der: &[u8],
    ) -> Result<Order> {
        bump(&self.csrs);
        read(&self.finalized).ok_or_else(|| not_found(finalize_url))
    }

    fn download_certificate(&self, _account: &Account, url: &str) -> Result<CertificateChain> {
        read(&self.certificate).ok_or_else(|| not_found(url))
    }
}

/// 每次回傳同一把預先產生的金鑰，並記錄呼叫次數。
pub(crate) struct FixedKeys {
    key_pair: KeyPair,
    generated: Mutex<usize>,
}

impl FixedKeys {
    pub(crate) fn new() -> std::result::Result<Self, KeyError> {
        Ok(Self {
            key_pair: KeyPair::generate_rsa(2048)?,
            generated: Mutex::new(0),
        })
    }

    pub(crate) fn key_pair(&self) -> KeyPair {
        self.key_pair.clone()
    }

    pub(crate) fn generated(&self) -> usize {
        read(&self.generated)
    }
}

impl KeyPairGenerator for FixedKeys {
    fn generate(&self) -> std::result::Result<KeyPair, KeyError> {
        bump(&self.generated);
        Ok(self.key_pair.clone())
    }
}
