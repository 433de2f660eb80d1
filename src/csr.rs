use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
}

type Result<T> = std::result::Result<T, CsrError>;

/// 產生帶有 SAN 擴展的 CSR，第一個 SAN 同時作為 CN。
///
/// ```
/// # use certkeeper::{csr::CSR, key_pair::KeyPair};
/// let key_pair = KeyPair::generate_rsa(2048).unwrap();
/// let der = CSR::new()
///     .set_san("example.com")
///     .set_san("*.example.com")
///     .build_der(&key_pair)
///     .unwrap();
/// assert!(!der.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct CSR {
    san_entries: Vec<String>,
}

impl CSR {
    pub fn new() -> Self {
        Self::default()
    }

    /// 網域本身與其萬用字元子網域。
    pub fn for_domain(domain: &str) -> Self {
        Self::new()
            .set_san(domain)
            .set_san(&format!("*.{}", domain))
    }

    pub fn set_san(mut self, dns_name: &str) -> Self {
        self.san_entries.push(dns_name.to_string());
        self
    }

    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        let common_name = self.san_entries.first().ok_or(CsrError::NoSanEntries)?;

        let mut req_builder = X509Req::builder()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", common_name)?;
        req_builder.set_subject_name(&name.build())?;

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }

    /// 以 DER 格式輸出，供 finalize 請求使用。
    pub fn build_der(self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        Ok(self.build(key_pair)?.to_der()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_csr_covers_wildcard() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let key_pair = KeyPair::generate_rsa(2048)?;
        let req = CSR::for_domain("example.com").build(&key_pair)?;

        let text = String::from_utf8(req.to_text()?)?;
        assert!(text.contains("DNS:example.com"));
        assert!(text.contains("DNS:*.example.com"));
        assert!(req.verify(&key_pair.pub_key)?);
        Ok(())
    }

    #[test]
    fn test_no_san_entries() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let key_pair = KeyPair::generate_rsa(2048)?;
        assert!(matches!(
            CSR::new().build(&key_pair),
            Err(CsrError::NoSanEntries)
        ));
        Ok(())
    }
}
