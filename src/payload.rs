use serde::{Deserialize, Serialize};

use crate::base64::Base64;

/// 所有 ACME 請求載荷共用的行為。
pub trait PayloadT: Serialize {
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 序列化為 JSON 後再做 Base64 編碼，作為 JWS 的 payload 段。
    fn to_base64(&self) -> Result<Base64, serde_json::Error> {
        Ok(Base64::new(self.to_json_string()?))
    }
}

/// 建立新帳號所需的載荷，固定同意服務條款。
#[derive(Debug, Serialize)]
pub struct NewAccountPayload {
    contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// `email` 若未帶 `mailto:` 前綴會自動補上。
    pub fn new(email: &str) -> Self {
        let contact = if email.starts_with("mailto:") {
            email.to_string()
        } else {
            format!("mailto:{}", email)
        };

        NewAccountPayload {
            contact: vec![contact],
            terms_of_service_agreed: true,
        }
    }
}

impl PayloadT for NewAccountPayload {}

/// 憑證涵蓋的識別項。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            type_: "dns".to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NewOrderPayload {
    identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    pub fn new(domains: &[String]) -> Self {
        Self {
            identifiers: domains.iter().map(Identifier::dns).collect(),
        }
    }
}

impl PayloadT for NewOrderPayload {}

/// 觸發挑戰驗證時送出的空物件 `{}`。
#[derive(Debug, Serialize)]
pub struct ChallengeValidationPayload {}

impl PayloadT for ChallengeValidationPayload {}

/// 完成訂單時送出的 CSR。
#[derive(Debug, Serialize)]
pub struct FinalizeOrderPayload {
    csr: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der: &[u8]) -> Self {
        Self {
            csr: Base64::new(csr_der).base64_url(),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {}
