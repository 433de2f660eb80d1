//! Namecheap XML API 客戶端。
//!
//! Namecheap 的 `setHosts` 會以傳入的內容整個取代網域的主機記錄，
//! 因此任何修改都必須先 `getHosts` 取得完整集合，再把修改後的集合送回。

use std::{fs, path::Path};

use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

const NAMECHEAP_API: &str = "https://api.namecheap.com/xml.response";
const CHECK_IP_URL: &str = "https://checkip.amazonaws.com/";
const IP_NOT_WHITELISTED: &str = "1011150";
/// 設定 API 白名單 IP 的頁面。
pub const WHITELIST_URL: &str = "https://ap.www.namecheap.com/settings/tools/apiaccess/whitelisted-ips";

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error(
        "Request rejected for client IP '{client_ip}'. Verify whitelisted IPs at: {}",
        WHITELIST_URL
    )]
    IpNotWhitelisted { client_ip: String },
    #[error("Registrar error {number}: {message}")]
    Api { number: String, message: String },
    #[error("Unexpected registrar response: {0}")]
    UnexpectedResponse(String),
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("Failed to read credentials: {0}")]
    Credentials(String),
}

type Result<T> = std::result::Result<T, RegistrarError>;

/// 一筆主機記錄。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsHostRecord {
    pub name: String,
    pub record_type: String,
    pub address: String,
    pub ttl: u32,
    pub mx_pref: Option<u16>,
}

impl DnsHostRecord {
    pub fn txt(name: impl Into<String>, value: impl Into<String>, ttl: u32) -> Self {
        Self {
            name: name.into(),
            record_type: "TXT".to_string(),
            address: value.into(),
            ttl,
            mx_pref: None,
        }
    }
}

/// 網域完整的主機記錄集合，連同郵件設定一起讀寫。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostRecordSet {
    pub email_type: Option<String>,
    pub records: Vec<DnsHostRecord>,
}

/// 以「整組取代」方式管理 DNS 記錄的註冊商。
pub trait HostRegistrar: Send + Sync {
    fn get_hosts(&self, domain: &str) -> Result<HostRecordSet>;

    /// 以 `hosts` 取代網域現有的全部記錄。
    fn set_hosts(&self, domain: &str, hosts: &HostRecordSet) -> Result<()>;
}

/// API 憑證檔的內容。
#[derive(Debug, Clone, Deserialize)]
pub struct NamecheapCredentials {
    pub api_key: String,
    pub api_user: String,
    pub user_name: String,
}

impl NamecheapCredentials {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|e| RegistrarError::Credentials(format!("{}: {}", path.display(), e)))?;
        serde_json::from_slice(&data)
            .map_err(|e| RegistrarError::Credentials(format!("{}: {}", path.display(), e)))
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(rename = "@Status")]
    status: String,
    #[serde(rename = "Errors", default)]
    errors: Option<ApiErrors>,
    #[serde(rename = "CommandResponse", default)]
    command_response: Option<CommandResponse>,
}

#[derive(Debug, Deserialize)]
struct ApiErrors {
    #[serde(rename = "Error", default)]
    errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorItem {
    #[serde(rename = "@Number")]
    number: String,
    #[serde(rename = "$text", default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(rename = "DomainDNSGetHostsResult", default)]
    hosts_result: Option<HostsResult>,
}

#[derive(Debug, Deserialize)]
struct HostsResult {
    #[serde(rename = "@EmailType", default)]
    email_type: Option<String>,
    #[serde(rename = "host", default)]
    hosts: Vec<HostElement>,
}

#[derive(Debug, Deserialize)]
struct HostElement {
    #[serde(rename = "@Name")]
    name: String,
    #[serde(rename = "@Type")]
    record_type: String,
    #[serde(rename = "@Address")]
    address: String,
    #[serde(rename = "@TTL")]
    ttl: u32,
    #[serde(rename = "@MXPref", default)]
    mx_pref: Option<u16>,
}

impl From<HostElement> for DnsHostRecord {
    fn from(host: HostElement) -> Self {
        // 非 MX 記錄也會回傳 MXPref，只保留 MX 的值
        let mx_pref = host.mx_pref.filter(|_| host.record_type == "MX");
        Self {
            name: host.name,
            record_type: host.record_type,
            address: host.address,
            ttl: host.ttl,
            mx_pref,
        }
    }
}

/// 將網域拆成 SLD（第一段）與 TLD（其餘部分）。
fn split_domain(domain: &str) -> Result<(&str, &str)> {
    match domain.split_once('.') {
        Some((sld, tld)) if !sld.is_empty() && !tld.is_empty() => Ok((sld, tld)),
        _ => Err(RegistrarError::InvalidDomain(domain.to_string())),
    }
}

pub struct NamecheapClient {
    client: Client,
    endpoint: String,
    credentials: NamecheapCredentials,
    client_ip: String,
}

impl NamecheapClient {
    pub fn new(credentials: NamecheapCredentials, client_ip: impl Into<String>) -> Self {
        Self::with_endpoint(NAMECHEAP_API, credentials, client_ip)
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        credentials: NamecheapCredentials,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            credentials,
            client_ip: client_ip.into(),
        }
    }

    /// 查詢本機對外的 IP，Namecheap 要求每個請求附上並比對白名單。
    pub fn fetch_client_ip() -> Result<String> {
        Self::fetch_client_ip_from(&Client::new(), CHECK_IP_URL)
    }

    fn fetch_client_ip_from(client: &Client, url: &str) -> Result<String> {
        let ip = client.get(url).send()?.error_for_status()?.text()?;
        let ip = ip.trim();
        if ip.is_empty() {
            return Err(RegistrarError::UnexpectedResponse(
                "Unable to determine public client IP".to_string(),
            ));
        }
        Ok(ip.to_string())
    }

    fn call(
        &self,
        command: &str,
        domain: &str,
        extra: Vec<(String, String)>,
    ) -> Result<ApiResponse> {
        let (sld, tld) = split_domain(domain)?;

        let mut params: Vec<(String, String)> = vec![
            ("ApiUser".into(), self.credentials.api_user.clone()),
            ("ApiKey".into(), self.credentials.api_key.clone()),
            ("UserName".into(), self.credentials.user_name.clone()),
            ("ClientIp".into(), self.client_ip.clone()),
            ("Command".into(), command.into()),
            ("SLD".into(), sld.into()),
            ("TLD".into(), tld.into()),
        ];
        params.extend(extra);

        let body = self.client.get(&self.endpoint).query(&params).send()?.text()?;
        let response: ApiResponse = quick_xml::de::from_str(&body)?;
        self.check_status(response)
    }

    fn check_status(&self, response: ApiResponse) -> Result<ApiResponse> {
        let status = response.status.clone();
        match status.as_str() {
            "OK" => Ok(response),
            "ERROR" => {
                let errors = response.errors.map(|e| e.errors).unwrap_or_default();
                if errors.iter().any(|e| e.number == IP_NOT_WHITELISTED) {
                    return Err(RegistrarError::IpNotWhitelisted {
                        client_ip: self.client_ip.clone(),
                    });
                }
                Err(errors
                    .into_iter()
                    .next()
                    .map(|e| RegistrarError::Api {
                        number: e.number,
                        message: e.message.trim().to_string(),
                    })
                    .unwrap_or_else(|| RegistrarError::Api {
                        number: String::new(),
                        message: "Error processing request".to_string(),
                    }))
            }
            other => Err(RegistrarError::UnexpectedResponse(format!(
                "status '{}'",
                other
            ))),
        }
    }
}

impl HostRegistrar for NamecheapClient {
    fn get_hosts(&self, domain: &str) -> Result<HostRecordSet> {
        let response = self.call("namecheap.domains.dns.getHosts", domain, Vec::new())?;
        let result = response
            .command_response
            .and_then(|c| c.hosts_result)
            .ok_or_else(|| {
                RegistrarError::UnexpectedResponse("missing DomainDNSGetHostsResult".to_string())
            })?;

        tracing::debug!(domain, count = result.hosts.len(), "Fetched host records");
        Ok(HostRecordSet {
            email_type: result.email_type,
            records: result.hosts.into_iter().map(DnsHostRecord::from).collect(),
        })
    }

    fn set_hosts(&self, domain: &str, hosts: &HostRecordSet) -> Result<()> {
        let mut params = Vec::new();
        for (index, record) in hosts.records.iter().enumerate() {
            let n = index + 1;
            params.push((format!("HostName{}", n), record.name.clone()));
            params.push((format!("RecordType{}", n), record.record_type.clone()));
            params.push((format!("Address{}", n), record.address.clone()));
            params.push((format!("TTL{}", n), record.ttl.to_string()));
            if let Some(mx_pref) = record.mx_pref {
                params.push((format!("MXPref{}", n), mx_pref.to_string()));
            }
        }
        if let Some(email_type) = &hosts.email_type {
            params.push(("EmailType".to_string(), email_type.clone()));
        }

        self.call("namecheap.domains.dns.setHosts", domain, params)?;
        tracing::debug!(domain, count = hosts.records.len(), "Replaced host records");
        Ok(())
    }
}
