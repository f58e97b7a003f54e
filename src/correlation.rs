//! Correlation tokens
//!
//! Opaque owner tokens round-tripped through providers so an inbound
//! notification can be traced back to its owning (user, dashboard) tenant.
//! Tokens are HMAC-SHA256 signed; verification recomputes the tag and
//! compares in constant time, so a provider echoing attacker-controlled
//! state cannot mint a binding to someone else's tenant.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PREFIX: &str = "hv1";

/// The tenant a correlation token resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(rename = "u")]
    pub user_id: String,
    #[serde(rename = "d")]
    pub dashboard_id: String,
}

/// Errors produced while issuing correlation tokens
#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("correlation key must not be empty")]
    EmptyKey,
}

/// Issues and verifies signed owner tokens
#[derive(Clone)]
pub struct CorrelationSigner {
    key: Vec<u8>,
}

impl CorrelationSigner {
    /// Create a signer over the shared correlation secret
    pub fn new(key: &[u8]) -> Result<Self, CorrelationError> {
        if key.is_empty() {
            return Err(CorrelationError::EmptyKey);
        }
        Ok(Self { key: key.to_vec() })
    }

    /// Issue a token identifying the given owner
    pub fn issue(&self, user_id: &str, dashboard_id: &str) -> String {
        let owner = Owner {
            user_id: user_id.to_string(),
            dashboard_id: dashboard_id.to_string(),
        };
        let payload = base64_url::encode(
            &serde_json::to_vec(&owner).expect("owner struct always serializes"),
        );
        let tag = self.tag(payload.as_bytes());
        format!("{TOKEN_PREFIX}.{payload}.{}", base64_url::encode(&tag))
    }

    /// Verify a token and recover its owner; any mismatch yields `None`
    pub fn verify(&self, token: &str) -> Option<Owner> {
        let mut parts = token.splitn(3, '.');
        let prefix = parts.next()?;
        let payload = parts.next()?;
        let tag = parts.next()?;

        if prefix != TOKEN_PREFIX {
            return None;
        }

        let presented = base64_url::decode(tag).ok()?;
        let expected = self.tag(payload.as_bytes());
        if !bool::from(presented.as_slice().ct_eq(&expected)) {
            return None;
        }

        let decoded = base64_url::decode(payload).ok()?;
        serde_json::from_slice(&decoded).ok()
    }

    fn tag(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .expect("HMAC accepts keys of any non-zero length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> CorrelationSigner {
        CorrelationSigner::new(b"test-correlation-key").expect("non-empty key")
    }

    #[test]
    fn issue_verify_roundtrip() {
        let signer = signer();
        let token = signer.issue("user-1", "dash-1");
        let owner = signer.verify(&token).expect("valid token");
        assert_eq!(owner.user_id, "user-1");
        assert_eq!(owner.dashboard_id, "dash-1");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let signer = signer();
        let token = signer.issue("user-1", "dash-1");

        let forged_payload = base64_url::encode(r#"{"u":"user-1","d":"someone-elses-dash"}"#);
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged_payload;
        let forged = parts.join(".");

        assert!(signer.verify(&forged).is_none());
    }

    #[test]
    fn token_from_a_different_key_is_rejected() {
        let other = CorrelationSigner::new(b"another-key").unwrap();
        let token = other.issue("user-1", "dash-1");
        assert!(signer().verify(&token).is_none());
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let signer = signer();
        assert!(signer.verify("").is_none());
        assert!(signer.verify("hv1").is_none());
        assert!(signer.verify("hv1.only-two-parts").is_none());
        assert!(signer.verify("wrong.prefix.token").is_none());
        assert!(signer.verify("hv1.!!!.???").is_none());
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(CorrelationSigner::new(b"").is_err());
    }

    #[test]
    fn tag_matches_reference_hmac() {
        let signer = signer();
        let token = signer.issue("u", "d");
        let payload = token.split('.').nth(1).unwrap();

        let mut mac = HmacSha256::new_from_slice(b"test-correlation-key").unwrap();
        mac.update(payload.as_bytes());
        let reference = hex::encode(mac.finalize().into_bytes());

        let presented = base64_url::decode(token.split('.').nth(2).unwrap()).unwrap();
        assert_eq!(hex::encode(presented), reference);
    }
}
