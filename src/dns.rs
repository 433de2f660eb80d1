use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

const GOOGLE_DOH: &str = "https://dns.google/resolve";
/// DNS 記錄型別 TXT 的代碼。
const TXT_TYPE: u16 = 16;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Resolver returned status {0}")]
    Status(u16),
}

type Result<T> = std::result::Result<T, DnsError>;

/// 解析結果中的一筆答案，`data` 已去除外圍引號。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DnsAnswer {
    pub name: String,
    #[serde(rename = "type", default)]
    pub record_type: u16,
    #[serde(rename = "TTL", default)]
    pub ttl: u32,
    pub data: String,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DnsAnswer>,
}

/// 用來確認 DNS 變更已對外可見的獨立解析器。
pub trait DnsPropagationOracle: Send + Sync {
    /// 查詢 TXT 記錄；沒有答案時回傳空陣列。
    fn resolve_txt(&self, name: &str) -> Result<Vec<DnsAnswer>>;
}

/// 透過 DNS-over-HTTPS（JSON API）查詢。
#[derive(Debug, Clone)]
pub struct DohOracle {
    client: Client,
    endpoint: String,
}

impl Default for DohOracle {
    fn default() -> Self {
        Self::new(GOOGLE_DOH)
    }
}

impl DohOracle {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl DnsPropagationOracle for DohOracle {
    fn resolve_txt(&self, name: &str) -> Result<Vec<DnsAnswer>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("name", name), ("type", "TXT")])
            .send()?;

        if !response.status().is_success() {
            return Err(DnsError::Status(response.status().as_u16()));
        }

        let body: DohResponse = serde_json::from_str(&response.text()?)?;
        Ok(body
            .answer
            .into_iter()
            .filter(|answer| answer.record_type == TXT_TYPE || answer.record_type == 0)
            .map(|answer| DnsAnswer {
                data: answer.data.trim_matches('"').to_string(),
                ..answer
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;

    #[test]
    fn test_resolve_txt_strips_quotes() -> Result<()> {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/resolve")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("name".into(), "_acme-challenge.example.com".into()),
                Matcher::UrlEncoded("type".into(), "TXT".into()),
            ]))
            .with_body(
                r#"{
                    "Status": 0,
                    "Answer": [
                        {"name": "_acme-challenge.example.com.", "type": 5, "TTL": 60, "data": "alias.example.net."},
                        {"name": "_acme-challenge.example.com.", "type": 16, "TTL": 60, "data": "\"digest-value\""}
                    ]
                }"#,
            )
            .create();

        let oracle = DohOracle::new(format!("{}/resolve", server.url()));
        let answers = oracle.resolve_txt("_acme-challenge.example.com")?;

        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].data, "digest-value");
        assert_eq!(answers[0].ttl, 60);
        Ok(())
    }

    #[test]
    fn test_missing_answer_is_empty() -> Result<()> {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/resolve")
            .match_query(Matcher::Any)
            .with_body(r#"{"Status": 3}"#)
            .create();

        let oracle = DohOracle::new(format!("{}/resolve", server.url()));
        assert!(oracle.resolve_txt("_acme-challenge.example.com")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_resolver_error_status() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/resolve")
            .match_query(Matcher::Any)
            .with_status(500)
            .create();

        let oracle = DohOracle::new(format!("{}/resolve", server.url()));
        assert!(matches!(
            oracle.resolve_txt("_acme-challenge.example.com"),
            Err(DnsError::Status(500))
        ));
    }
}
