//! # Connection Handshake Verification
//!
//! Clients present a signed identity token and a target dashboard id when a
//! duplex connection opens. Verification happens exactly once, before any
//! binding: a valid signature yields a [`VerifiedIdentity`] carrying the
//! stable user id, and only that type can bind into the presence directory.
//! Callers close the connection on any error here.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;

use crate::presence::ALL_DASHBOARDS;

/// Errors produced during handshake verification
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("identity token rejected: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("identity token carries no subject")]
    MissingSubject,
    #[error("invalid dashboard id: {0}")]
    InvalidDashboard(String),
}

/// Proof that a connection's identity token was verified.
///
/// Only [`verify_identity`] constructs this, so holding one implies the
/// signature check happened.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    user_id: String,
}

impl VerifiedIdentity {
    /// Stable user id extracted from the verified token
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Verifies a signed identity token against the shared handshake secret and
/// extracts the stable user id.
pub fn verify_identity(token: &str, secret: &[u8]) -> Result<VerifiedIdentity, HandshakeError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<IdentityClaims>(token, &DecodingKey::from_secret(secret), &validation)?;

    if data.claims.sub.trim().is_empty() {
        return Err(HandshakeError::MissingSubject);
    }

    Ok(VerifiedIdentity {
        user_id: data.claims.sub,
    })
}

/// Validates the dashboard id presented at connect time: a concrete id or the
/// `"all"` sentinel.
pub fn validate_dashboard_id(dashboard_id: &str) -> Result<(), HandshakeError> {
    if dashboard_id == ALL_DASHBOARDS {
        return Ok(());
    }
    if dashboard_id.trim().is_empty() {
        return Err(HandshakeError::InvalidDashboard(
            "dashboard id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Builds a verified identity directly, bypassing signature checks. Test-only.
#[cfg(test)]
pub fn test_identity(user_id: &str) -> VerifiedIdentity {
    VerifiedIdentity {
        user_id: user_id.to_string(),
    }
}
