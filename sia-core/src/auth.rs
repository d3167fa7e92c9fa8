use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Computes and verifies the `X-Signature: hex(HMAC-SHA256(hmac_key, body))`
/// header required on `POST /save`. Verification runs in constant time so a
/// timing side channel can't leak how much of a guessed signature matched.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    key: Vec<u8>,
}

impl RequestSigner {
    pub fn new(hmac_key: impl AsRef<[u8]>) -> Self {
        Self {
            key: hmac_key.as_ref().to_vec(),
        }
    }

    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC-SHA-256 accepts keys of any size");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify `candidate` (a hex-encoded digest from the `X-Signature`
    /// header) against `body`. Malformed hex is treated as a mismatch, not
    /// an error, so callers have a single boolean outcome to branch on.
    pub fn verify(&self, body: &[u8], candidate: &str) -> bool {
        let Ok(candidate_bytes) = hex::decode(candidate.trim()) else {
            return false;
        };

        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC-SHA-256 accepts keys of any size");
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        expected.as_slice().ct_eq(&candidate_bytes).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let signer = RequestSigner::new("super-secret");
        let body = br#"{"author":"alice"}"#;
        let signature = signer.sign(body);
        assert!(signer.verify(body, &signature));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let signer = RequestSigner::new("super-secret");
        let other = RequestSigner::new("different-secret");
        let body = b"payload";
        let signature = other.sign(body);
        assert!(!signer.verify(body, &signature));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let signer = RequestSigner::new("super-secret");
        let signature = signer.sign(b"original");
        assert!(!signer.verify(b"tampered", &signature));
    }

    #[test]
    fn verify_rejects_malformed_hex() {
        let signer = RequestSigner::new("super-secret");
        assert!(!signer.verify(b"payload", "not-hex!!"));
    }
}
