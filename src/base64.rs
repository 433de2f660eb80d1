use ::base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use thiserror::Error;

/// Base64 解碼失敗時的錯誤。
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid base64 input: {0}")]
    Invalid(#[from] ::base64::DecodeError),
}

/// 已編碼的 Base64 資料，JWS 各段與 CSR 傳輸時皆以此型別傳遞。
///
/// 內部保存標準 Base64 字串，需要時再轉為 URL-safe（無填充）格式。
///
/// ```
/// # use certkeeper::base64::Base64;
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.as_str(), "SGVsbG8sIFdvcmxkIQ==");
/// assert_eq!(b64.base64_url(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    encoded: String,
}

impl Base64 {
    /// 將任意位元組資料編碼為 Base64。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            encoded: STANDARD.encode(input),
        }
    }

    /// 從 URL-safe 格式（可省略填充）的字串建立實例，並驗證其內容。
    pub fn from_url(url_encoded: &str) -> Result<Self, DecodeError> {
        let bytes = URL_SAFE_NO_PAD.decode(url_encoded.trim_end_matches('='))?;
        Ok(Self::new(bytes))
    }

    /// 解碼回原始位元組。
    pub fn decode(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(STANDARD.decode(&self.encoded)?)
    }

    /// 轉為 URL-safe 且不含填充的 Base64 字串（RFC 7515 使用的格式）。
    pub fn base64_url(&self) -> String {
        self.encoded
            .replace('+', "-")
            .replace('/', "_")
            .replace('=', "")
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_different_lengths() {
        assert_eq!(Base64::new("a").as_str(), "YQ==");
        assert_eq!(Base64::new("ab").as_str(), "YWI=");
        assert_eq!(Base64::new("abc").as_str(), "YWJj");
    }

    #[test]
    fn test_url_safe_encoding() {
        let base64 = Base64::new([0xFB, 0xFF, 0xBF]);
        assert_eq!(base64.as_str(), "+/+/");
        assert_eq!(base64.base64_url(), "-_-_");
    }

    #[test]
    fn test_empty_payload_is_empty_string() {
        assert_eq!(Base64::new(b"").base64_url(), "");
    }

    #[test]
    fn test_from_url() -> Result<(), DecodeError> {
        let base64 = Base64::from_url("SGVsbG8sIFdvcmxkIQ")?;
        assert_eq!(base64.as_str(), "SGVsbG8sIFdvcmxkIQ==");
        assert_eq!(base64.decode()?, b"Hello, World!");
        Ok(())
    }

    #[test]
    fn test_invalid_char() {
        assert!(Base64::from_url("SGVsbG8$Ww").is_err());
    }
}
