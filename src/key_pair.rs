use openssl::{
    error::ErrorStack,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
    sha::sha256,
};
use thiserror::Error;

use crate::{
    base64::Base64,
    jwk::{Jwk, JwkError},
};

/// 鍵相關操作的錯誤列舉，涵蓋 OpenSSL 與 JWK 轉換錯誤。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported algorithm")]
    UnsupportedAlgorithm,
    #[error("JWK error: {0}")]
    JwkError(#[from] JwkError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// 表示一組非對稱加密的金鑰對。
///
/// 帳戶金鑰與網域金鑰共用此型別，兩者的保存路徑互相獨立。
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// 加密演算法名稱，目前僅支援 "RSA"。
    pub alg_name: String,
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝。
    pub pri_key: PKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: PKey<Public>,
}

impl KeyPair {
    /// 產生指定位元長度的 RSA 金鑰對。
    pub fn generate_rsa(bits: u32) -> Result<Self> {
        let pri_key = PKey::from_rsa(Rsa::generate(bits)?)?;
        Self::from_private_key(pri_key)
    }

    /// 根據 PEM 格式的私鑰資料建立一組金鑰對。
    ///
    /// 同時接受 PKCS#1（`BEGIN RSA PRIVATE KEY`）與 PKCS#8 格式。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pri_key_pem)?;
        Self::from_private_key(pri_key)
    }

    fn from_private_key(pri_key: PKey<Private>) -> Result<Self> {
        let pub_key = Self::derive_public_key(&pri_key)?;
        Ok(Self {
            alg_name: "RSA".to_owned(),
            pri_key,
            pub_key,
        })
    }

    /// 將私鑰序列化為 PKCS#8 PEM，作為持久化格式。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    /// 根據私鑰派生出對應的公鑰。
    fn derive_public_key(pri_key: &PKey<Private>) -> Result<PKey<Public>> {
        match pri_key.id() {
            Id::RSA => {
                let rsa = pri_key.rsa()?;
                let pub_rsa =
                    Rsa::from_public_components(rsa.n().to_owned()?, rsa.e().to_owned()?)?;
                Ok(PKey::from_rsa(pub_rsa)?)
            }
            _ => Err(KeyError::UnsupportedAlgorithm),
        }
    }

    /// 計算金鑰的 JWK thumbprint（RFC 7638），用於組出 key authorization。
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::from_key_pair(self)?;
        let hash = sha256(jwk.canonical_json()?.as_bytes());
        Ok(Base64::new(hash).base64_url())
    }

    /// 取得金鑰的位元長度。
    pub fn key_parameters(&self) -> Result<u32> {
        match self.pri_key.id() {
            Id::RSA => Ok(self.pri_key.rsa()?.size() * 8),
            _ => Err(KeyError::UnsupportedAlgorithm),
        }
    }

    /// 比較兩組金鑰是否為同一把私鑰。
    pub fn same_key(&self, other: &KeyPair) -> bool {
        self.pub_key.public_eq(&other.pub_key)
    }
}

/// 產生全新金鑰對的能力介面。
///
/// 帳戶建立與網域 CSR 簽署都透過此介面取得新金鑰，測試時可替換為固定金鑰。
pub trait KeyPairGenerator: Send + Sync {
    fn generate(&self) -> Result<KeyPair>;
}

/// 產生 RSA 金鑰對的預設實作。
#[derive(Debug, Clone, Copy)]
pub struct RsaKeyPairGenerator {
    bits: u32,
}

impl RsaKeyPairGenerator {
    /// 預設的金鑰位數。
    pub const DEFAULT_KEY_BITS: u32 = 2048;

    pub fn new(bits: u32) -> Self {
        Self { bits }
    }
}

impl Default for RsaKeyPairGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_KEY_BITS)
    }
}

impl KeyPairGenerator for RsaKeyPairGenerator {
    fn generate(&self) -> Result<KeyPair> {
        KeyPair::generate_rsa(self.bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_default_bits() -> Result<()> {
        let key_pair = RsaKeyPairGenerator::default().generate()?;
        assert_eq!(key_pair.key_parameters()?, 2048);
        assert_eq!(key_pair.alg_name, "RSA");
        Ok(())
    }

    #[test]
    fn test_pem_round_trip_keeps_key() -> Result<()> {
        let key_pair = KeyPair::generate_rsa(2048)?;
        let restored = KeyPair::from_pem(&key_pair.to_pem()?)?;
        assert!(key_pair.same_key(&restored));
        assert_eq!(key_pair.thumbprint()?, restored.thumbprint()?);
        Ok(())
    }

    #[test]
    fn test_invalid_pem() {
        assert!(KeyPair::from_pem(b"not a key").is_err());
    }
}
