//! ACME（RFC 8555）協定的傳輸層。
//!
//! [`AcmeApi`] 是流程其餘部分唯一看得到的介面，[`HttpAcmeClient`] 以 reqwest
//! 實作之：負責 JWS 簽署、nonce 管理與 problem 文件的轉換。

use reqwest::{
    blocking::{Client, Response},
    header::{ACCEPT, CONTENT_TYPE, LOCATION, RETRY_AFTER},
};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    account::Account,
    authorization::{Authorization, AuthorizationObject},
    base64::Base64,
    certificate::CertificateChain,
    challenge::{Challenge, ChallengeTrigger},
    directory::{Directory, DirectoryError},
    jwk::{Jwk, JwkError},
    jws::{Jws, JwsError},
    key_pair::{KeyError, KeyPair},
    nonce::{Nonce, NonceError},
    order::Order,
    payload::{
        ChallengeValidationPayload, FinalizeOrderPayload, NewAccountPayload, NewOrderPayload,
        PayloadT,
    },
    protection::{Protection, ProtectionError},
    signature::{create_signature, SignatureError},
};

const JOSE_JSON: &str = "application/jose+json";
const PEM_CHAIN: &str = "application/pem-certificate-chain";
const BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("ACME server returned {status} ({kind}): {detail}")]
    Problem {
        status: u16,
        kind: String,
        detail: String,
    },
    #[error("Response from {0} has no Location header")]
    MissingLocation(String),
}

pub type Result<T> = std::result::Result<T, AcmeError>;

/// 重新讀取資源的結果：取得新狀態，或伺服器要求稍後再試。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Updated(T),
    RetryLater,
}

/// 流程所需的 ACME 操作。
pub trait AcmeApi: Send + Sync {
    /// 註冊新帳戶並同意服務條款，回傳帳戶 URL。
    fn new_account(&self, email: &str, key_pair: &KeyPair) -> Result<String>;

    fn new_order(&self, account: &Account, domains: &[String]) -> Result<Order>;

    fn fetch_order(&self, account: &Account, url: &str) -> Result<PollOutcome<Order>>;

    fn fetch_authorization(
        &self,
        account: &Account,
        url: &str,
    ) -> Result<PollOutcome<Authorization>>;

    fn trigger_challenge(&self, account: &Account, url: &str) -> Result<()>;

    fn finalize_order(&self, account: &Account, finalize_url: &str, csr_der: &[u8])
        -> Result<Order>;

    fn download_certificate(&self, account: &Account, url: &str) -> Result<CertificateChain>;
}

/// 綁定帳戶的 ACME 連線，提供觸發挑戰的能力。
pub struct Session<'a> {
    api: &'a dyn AcmeApi,
    account: &'a Account,
}

impl<'a> Session<'a> {
    pub fn new(api: &'a dyn AcmeApi, account: &'a Account) -> Self {
        Self { api, account }
    }
}

impl ChallengeTrigger for Session<'_> {
    fn trigger(&self, challenge: &Challenge) -> Result<()> {
        tracing::info!(url = %challenge.url, "Triggering challenge validation");
        self.api.trigger_challenge(self.account, &challenge.url)
    }
}

#[derive(Debug, Deserialize)]
struct Problem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    detail: String,
}

/// 使用 reqwest 與 ACME 伺服器溝通的實作。
pub struct HttpAcmeClient {
    client: Client,
    directory: Directory,
    nonce: Nonce,
}

impl HttpAcmeClient {
    /// 下載目錄並建立客戶端。
    pub fn new(directory_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("certkeeper/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let directory = Directory::fetch(&client, directory_url)?;
        let nonce = Nonce::new(client.clone(), directory.new_nonce.clone());

        Ok(Self {
            client,
            directory,
            nonce,
        })
    }

    /// 送出已簽署的 POST 請求；遇到 badNonce 時以新的 nonce 重試一次。
    fn post(
        &self,
        url: &str,
        key_pair: &KeyPair,
        kid: Option<&str>,
        payload: &Base64,
        accept: Option<&str>,
    ) -> Result<Response> {
        let mut retried = false;

        loop {
            let body = self.sign(url, key_pair, kid, payload)?;

            let mut request = self
                .client
                .post(url)
                .header(CONTENT_TYPE, JOSE_JSON)
                .body(body);
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }

            let response = request.send()?;
            self.nonce.remember(&response);

            if response.status().is_success() {
                return Ok(response);
            }

            let error = Self::problem(response);
            match &error {
                AcmeError::Problem { kind, .. } if kind == BAD_NONCE && !retried => {
                    tracing::debug!(url, "Server rejected nonce, retrying");
                    retried = true;
                }
                _ => return Err(error),
            }
        }
    }

    fn sign(
        &self,
        url: &str,
        key_pair: &KeyPair,
        kid: Option<&str>,
        payload: &Base64,
    ) -> Result<String> {
        let protection = match kid {
            Some(kid) => Protection::new(&self.nonce).with_kid(kid),
            None => Protection::new(&self.nonce).with_jwk(Jwk::from_key_pair(key_pair)?)?,
        };
        let header = protection.create_header(url)?.to_base64()?;
        let signature = create_signature(&header, payload, key_pair)?;

        Ok(Jws::new(&header, payload, &signature).to_json()?)
    }

    fn problem(response: Response) -> AcmeError {
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();

        match serde_json::from_str::<Problem>(&body) {
            Ok(problem) => AcmeError::Problem {
                status,
                kind: problem.kind,
                detail: problem.detail,
            },
            Err(_) => AcmeError::Problem {
                status,
                kind: String::new(),
                detail: body,
            },
        }
    }

    fn post_as_get(&self, account: &Account, url: &str, accept: Option<&str>) -> Result<Response> {
        self.post(url, &account.key_pair, Some(&account.url), &Base64::new(""), accept)
    }

    fn location(response: &Response, url: &str) -> Result<String> {
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
            .ok_or_else(|| AcmeError::MissingLocation(url.to_string()))
    }

    fn parse_order(response: Response, url: String) -> Result<Order> {
        let mut order: Order = serde_json::from_str(&response.text()?)?;
        order.url = url;
        Ok(order)
    }
}

impl AcmeApi for HttpAcmeClient {
    fn new_account(&self, email: &str, key_pair: &KeyPair) -> Result<String> {
        let url = &self.directory.new_account;
        let payload = NewAccountPayload::new(email).to_base64()?;

        let response = self.post(url, key_pair, None, &payload, None)?;
        let location = Self::location(&response, url)?;

        tracing::info!(email, account = %location, "Registered ACME account");
        Ok(location)
    }

    fn new_order(&self, account: &Account, domains: &[String]) -> Result<Order> {
        let url = &self.directory.new_order;
        let payload = NewOrderPayload::new(domains).to_base64()?;

        let response = self.post(url, &account.key_pair, Some(&account.url), &payload, None)?;
        let location = Self::location(&response, url)?;

        Self::parse_order(response, location)
    }

    fn fetch_order(&self, account: &Account, url: &str) -> Result<PollOutcome<Order>> {
        let response = self.post_as_get(account, url, None)?;
        let retry_after = response.headers().contains_key(RETRY_AFTER);
        let order = Self::parse_order(response, url.to_string())?;

        if retry_after && !order.status.is_terminal() {
            return Ok(PollOutcome::RetryLater);
        }
        Ok(PollOutcome::Updated(order))
    }

    fn fetch_authorization(
        &self,
        account: &Account,
        url: &str,
    ) -> Result<PollOutcome<Authorization>> {
        let response = self.post_as_get(account, url, None)?;
        let retry_after = response.headers().contains_key(RETRY_AFTER);
        let object: AuthorizationObject = serde_json::from_str(&response.text()?)?;

        if retry_after && !object.status.is_terminal() {
            return Ok(PollOutcome::RetryLater);
        }

        let thumbprint = account.key_pair.thumbprint()?;
        Ok(PollOutcome::Updated(Authorization::from_object(
            url, object, &thumbprint,
        )))
    }

    fn trigger_challenge(&self, account: &Account, url: &str) -> Result<()> {
        let payload = ChallengeValidationPayload {}.to_base64()?;
        self.post(url, &account.key_pair, Some(&account.url), &payload, None)?;
        Ok(())
    }

    fn finalize_order(
        &self,
        account: &Account,
        finalize_url: &str,
        csr_der: &[u8],
    ) -> Result<Order> {
        let payload = FinalizeOrderPayload::new(csr_der).to_base64()?;
        let response = self.post(
            finalize_url,
            &account.key_pair,
            Some(&account.url),
            &payload,
            None,
        )?;
        // finalize 的回應不一定附帶 Location，呼叫端會補回原本的訂單 URL
        let location = Self::location(&response, finalize_url).unwrap_or_default();

        Self::parse_order(response, location)
    }

    fn download_certificate(&self, account: &Account, url: &str) -> Result<CertificateChain> {
        let response = self.post_as_get(account, url, Some(PEM_CHAIN))?;
        Ok(CertificateChain::new(response.text()?))
    }
}
