//! 單一網域的證書生命週期：帳戶、訂單、授權驗證、最終確認與續期檢查。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::{
    account::{Account, AccountError, AccountManager},
    acme::{AcmeApi, AcmeError, PollOutcome},
    artifact::{certificate_chain, ArtifactError, ArtifactStore},
    authorization::{
        Authorization, AuthorizationCoordinator, AuthorizationError, AuthorizationStatus,
    },
    certificate::{renewal_window_open, CertificateChain, CertificateError, RENEWAL_WINDOW_DAYS},
    clock::{Clock, Interrupted, POLL_INTERVAL},
    key_pair::KeyPairGenerator,
    order::{Order, OrderCoordinator, OrderError, OrderStatus},
    provisioner::ChallengeProvisioner,
};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Order error: {0}")]
    Order(#[from] OrderError),
    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),
    #[error("ACME error: {0}")]
    Acme(#[from] AcmeError),
    #[error("Storage error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

type Result<T> = std::result::Result<T, RunError>;

/// 一次執行的結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 本次完成最終確認；沒有證書 URL 時 `expires` 為 `None`。
    Issued { expires: Option<DateTime<Utc>> },
    /// 訂單已是 `valid`，只檢查到期日。
    Current {
        expires: Option<DateTime<Utc>>,
        renewal_open: bool,
    },
    /// 仍有授權未通過，本次不送出 CSR。
    AuthorizationsIncomplete,
}

/// 執行所需的所有外部能力。
pub struct Context {
    pub api: Arc<dyn AcmeApi>,
    pub store: ArtifactStore,
    pub keys: Arc<dyn KeyPairGenerator>,
    pub provisioner: Arc<dyn ChallengeProvisioner>,
    pub clock: Arc<dyn Clock>,
}

pub struct Orchestrator {
    ctx: Context,
}

impl Orchestrator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// 執行一次完整流程；任何錯誤都在此記錄，並回傳 `None`。
    pub fn run(&self, email: &str, domain: &str) -> Option<RunOutcome> {
        match self.try_run(email, domain) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(domain, error = %e, "Certificate run failed");
                None
            }
        }
    }

    pub fn try_run(&self, email: &str, domain: &str) -> Result<RunOutcome> {
        let ctx = &self.ctx;
        let account = AccountManager::new(ctx.api.as_ref(), &ctx.store, ctx.keys.as_ref())
            .login_or_create(email)?;

        let orders = self.orders();
        let order = orders.get_or_create_order(&account, domain)?;
        tracing::info!(domain, order = %order.url, status = ?order.status, "Processing order");

        match order.status {
            OrderStatus::Valid => self.check_renewal(&account, &order, domain),
            OrderStatus::Pending => {
                if !self.process_authorizations(&account, &order)? {
                    tracing::warn!(domain, "Not all authorizations are valid, skipping finalization");
                    return Ok(RunOutcome::AuthorizationsIncomplete);
                }
                self.finalize(&account, &order, domain)
            }
            OrderStatus::Ready | OrderStatus::Processing => self.finalize(&account, &order, domain),
            OrderStatus::Invalid => Err(OrderError::OrderInvalid(order.url).into()),
        }
    }

    fn orders(&self) -> OrderCoordinator<'_> {
        OrderCoordinator::new(
            self.ctx.api.as_ref(),
            &self.ctx.store,
            self.ctx.keys.as_ref(),
            self.ctx.clock.as_ref(),
        )
    }

    /// 處理所有待驗證的授權，回傳重新取得後是否全部為 `valid`。
    fn process_authorizations(&self, account: &Account, order: &Order) -> Result<bool> {
        let coordinator = AuthorizationCoordinator::new(
            self.ctx.api.as_ref(),
            self.ctx.provisioner.as_ref(),
            self.ctx.clock.as_ref(),
        );

        for url in &order.authorizations {
            let authorization = self.fetch_authorization(account, url)?;
            match authorization.status {
                AuthorizationStatus::Pending => {
                    coordinator.process(account, &authorization)?;
                }
                AuthorizationStatus::Valid => tracing::debug!(
                    identifier = %authorization.identifier.value,
                    wildcard = authorization.wildcard,
                    "Authorization already valid"
                ),
                status => tracing::warn!(
                    identifier = %authorization.identifier.value,
                    ?status,
                    "Skipping authorization"
                ),
            }
        }

        for url in &order.authorizations {
            if self.fetch_authorization(account, url)?.status != AuthorizationStatus::Valid {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn fetch_authorization(&self, account: &Account, url: &str) -> Result<Authorization> {
        loop {
            match self.ctx.api.fetch_authorization(account, url)? {
                PollOutcome::Updated(authorization) => return Ok(authorization),
                PollOutcome::RetryLater => self.ctx.clock.sleep(POLL_INTERVAL)?,
            }
        }
    }

    fn finalize(&self, account: &Account, order: &Order, domain: &str) -> Result<RunOutcome> {
        let chain = self.orders().finalize_order(account, order, domain)?;
        let expires = match chain {
            Some(chain) => {
                let expires = chain.not_after()?;
                tracing::info!(domain, expires = %expires, "Certificate issued");
                Some(expires)
            }
            None => None,
        };
        Ok(RunOutcome::Issued { expires })
    }

    /// 讀取已保存的證書鏈（沒有時向伺服器下載並補存）並記錄到期日與續期時間。
    fn check_renewal(&self, account: &Account, order: &Order, domain: &str) -> Result<RunOutcome> {
        let Some(chain) = self.current_chain(account, order, domain)? else {
            tracing::warn!(domain, "Valid order has no certificate");
            return Ok(RunOutcome::Current {
                expires: None,
                renewal_open: false,
            });
        };

        let expires = chain.not_after()?;
        let renewal_open = renewal_window_open(expires, self.ctx.clock.now());
        if renewal_open {
            tracing::info!(domain, expires = %expires, "Certificate is eligible for renewal");
        } else {
            let renew_after = expires - Duration::days(RENEWAL_WINDOW_DAYS);
            tracing::info!(
                domain,
                expires = %expires,
                renew_after = %renew_after,
                "Certificate is current"
            );
        }

        Ok(RunOutcome::Current {
            expires: Some(expires),
            renewal_open,
        })
    }

    fn current_chain(
        &self,
        account: &Account,
        order: &Order,
        domain: &str,
    ) -> Result<Option<CertificateChain>> {
        let path = certificate_chain(domain);
        if let Some(chain) = self.ctx.store.load_certificate_chain(&path)? {
            return Ok(Some(chain));
        }
        let Some(url) = order.certificate.as_deref() else {
            return Ok(None);
        };

        tracing::info!(domain, "Certificate chain missing from storage, downloading");
        let chain = self.ctx.api.download_certificate(account, url)?;
        self.ctx.store.save_certificate_chain(&path, &chain)?;
        Ok(Some(chain))
    }
}
