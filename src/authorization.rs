use scopeguard::ScopeGuard;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    account::Account,
    acme::{AcmeApi, AcmeError, PollOutcome, Session},
    challenge::{Challenge, ChallengeObject, ChallengeType},
    clock::{Clock, Interrupted, POLL_INTERVAL},
    payload::Identifier,
    provisioner::{ChallengeProvisioner, ProvisionError},
};

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("dns-01 challenge not found for authorization of '{0}'")]
    MissingDnsChallenge(String),
    #[error("Authorization for '{identifier}' finished with status {status:?}")]
    Failed {
        identifier: String,
        status: AuthorizationStatus,
    },
    #[error("ACME error: {0}")]
    Acme(#[from] AcmeError),
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

type Result<T> = std::result::Result<T, AuthorizationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// 除了 `pending` 以外都是最終狀態。
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// 伺服器回傳的授權物件。
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationObject {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub wildcard: bool,
    #[serde(default)]
    pub challenges: Vec<ChallengeObject>,
}

/// 單一識別項的授權，每次執行時從訂單重新取得，不做保存。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub url: String,
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub wildcard: bool,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    pub fn from_object(url: &str, object: AuthorizationObject, thumbprint: &str) -> Self {
        Self {
            url: url.to_string(),
            identifier: object.identifier,
            status: object.status,
            wildcard: object.wildcard,
            challenges: object
                .challenges
                .into_iter()
                .map(|c| Challenge::from_object(c, thumbprint))
                .collect(),
        }
    }

    pub fn dns_challenge(&self) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == ChallengeType::Dns01)
    }
}

/// 驅動單一授權完成驗證，並保證驗證記錄一定會被清除。
pub struct AuthorizationCoordinator<'a> {
    api: &'a dyn AcmeApi,
    provisioner: &'a dyn ChallengeProvisioner,
    clock: &'a dyn Clock,
}

impl<'a> AuthorizationCoordinator<'a> {
    pub fn new(
        api: &'a dyn AcmeApi,
        provisioner: &'a dyn ChallengeProvisioner,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            api,
            provisioner,
            clock,
        }
    }

    /// 佈署記錄、觸發驗證並輪詢至最終狀態，回傳最後取得的授權。
    ///
    /// 缺少 dns-01 挑戰時在任何 DNS 變更之前直接失敗。清除動作在所有離開路徑上恰好執行一次：
    /// 正常或回傳錯誤時於最後一次狀態更新後執行，panic 時由 guard 在 unwind 中執行。
    pub fn process(&self, account: &Account, authorization: &Authorization) -> Result<Authorization> {
        let domain = authorization.identifier.value.as_str();
        let challenge = authorization
            .dns_challenge()
            .cloned()
            .ok_or_else(|| AuthorizationError::MissingDnsChallenge(domain.to_string()))?;

        tracing::info!(domain, "Processing authorization");

        let guard = scopeguard::guard((), |_| self.cleanup(domain, &challenge));
        let result = self.provision_and_poll(account, domain, authorization, &challenge);
        ScopeGuard::into_inner(guard);

        self.finish(account, authorization);
        self.cleanup(domain, &challenge);
        result
    }

    fn provision_and_poll(
        &self,
        account: &Account,
        domain: &str,
        authorization: &Authorization,
        challenge: &Challenge,
    ) -> Result<Authorization> {
        let session = Session::new(self.api, account);
        self.provisioner.process(domain, challenge, &session)?;

        let updated = self.poll(account, authorization)?;
        if updated.status != AuthorizationStatus::Valid {
            return Err(AuthorizationError::Failed {
                identifier: domain.to_string(),
                status: updated.status,
            });
        }
        Ok(updated)
    }

    fn poll(&self, account: &Account, authorization: &Authorization) -> Result<Authorization> {
        loop {
            self.clock.sleep(POLL_INTERVAL)?;
            match self.api.fetch_authorization(account, &authorization.url)? {
                PollOutcome::Updated(updated) if updated.status.is_terminal() => return Ok(updated),
                PollOutcome::Updated(updated) => tracing::debug!(
                    domain = %authorization.identifier.value,
                    status = ?updated.status,
                    "Authorization still processing"
                ),
                PollOutcome::RetryLater => tracing::debug!(
                    domain = %authorization.identifier.value,
                    "Server asked to retry later"
                ),
            }
        }
    }

    /// 最後一次更新狀態並記錄，失敗時只記錄不回報。
    fn finish(&self, account: &Account, authorization: &Authorization) {
        let status = match self.api.fetch_authorization(account, &authorization.url) {
            Ok(PollOutcome::Updated(updated)) => format!("{:?}", updated.status),
            Ok(PollOutcome::RetryLater) => "unknown".to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "Final authorization refresh failed");
                "unknown".to_string()
            }
        };
        tracing::info!(
            domain = %authorization.identifier.value,
            status,
            "Authorization finished"
        );
    }

    fn cleanup(&self, domain: &str, challenge: &Challenge) {
        if let Err(e) = self.provisioner.cleanup(domain, challenge) {
            tracing::error!(domain, error = %e, "Failed to remove challenge record");
        }
    }
}
