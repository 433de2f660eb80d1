use openssl::{hash::MessageDigest, sign::Signer};
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

/// 簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing error: {0}")]
    SigningError(#[from] openssl::error::ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// 簽名演算法的介面。
trait SignatureAlgorithmT {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError>;
}

/// RS256（RSASSA-PKCS1-v1_5 + SHA-256）。
struct RSASignature;

impl SignatureAlgorithmT for RSASignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

fn algorithm_for(alg_name: &str) -> Result<Box<dyn SignatureAlgorithmT>, SignatureError> {
    match alg_name.to_uppercase().as_str() {
        "RSA" => Ok(Box::new(RSASignature)),
        _ => Err(SignatureError::UnsupportedAlgorithm(alg_name.to_string())),
    }
}

/// 以 `header.payload` 作為簽名輸入，產生 JWS 簽名。
pub fn create_signature(
    header_b64: &Base64,
    payload_b64: &Base64,
    key_pair: &KeyPair,
) -> Result<Base64, SignatureError> {
    let signing_input = format!("{}.{}", header_b64.base64_url(), payload_b64.base64_url());
    let signature = algorithm_for(&key_pair.alg_name)?.sign(signing_input.as_bytes(), key_pair)?;
    Ok(Base64::new(signature))
}

#[cfg(test)]
mod tests {
    use openssl::sign::Verifier;

    use super::*;

    #[test]
    fn test_signature_verifies_with_public_key() -> Result<(), Box<dyn std::error::Error>> {
        let key_pair = KeyPair::generate_rsa(2048)?;
        let header = Base64::new("{\"alg\":\"RS256\"}");
        let payload = Base64::new("{}");

        let signature = create_signature(&header, &payload, &key_pair)?;

        let input = format!("{}.{}", header.base64_url(), payload.base64_url());
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key_pair.pub_key)?;
        verifier.update(input.as_bytes())?;
        assert!(verifier.verify(&signature.decode()?)?);
        Ok(())
    }
}
