use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use surplus_core::UserId;

use crate::roles::Role;

/// Access-token claims model (transport-agnostic).
///
/// This is the minimal set of claims the marketplace expects once a bearer
/// token has been decoded/verified by whatever transport/security layer is in
/// use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    /// Role granted for this session.
    pub role: Role,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate access-token claims.
///
/// Note: this validates the *claims* only. Signature verification / decoding
/// is intentionally outside this crate.
pub fn validate_claims(
    claims: &AccessClaims,
    now: DateTime<Utc>,
) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(issued: DateTime<Utc>, expires: DateTime<Utc>) -> AccessClaims {
        AccessClaims {
            sub: UserId::new(),
            role: Role::Customer,
            issued_at: issued,
            expires_at: expires,
        }
    }

    #[test]
    fn accepts_token_inside_its_window() {
        let now = Utc::now();
        let c = claims(now - Duration::minutes(1), now + Duration::minutes(10));
        assert!(validate_claims(&c, now).is_ok());
    }

    #[test]
    fn rejects_expired_token() {
        let now = Utc::now();
        let c = claims(now - Duration::minutes(20), now - Duration::minutes(1));
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::Expired));
    }

    #[test]
    fn rejects_token_from_the_future() {
        let now = Utc::now();
        let c = claims(now + Duration::minutes(5), now + Duration::minutes(15));
        assert_eq!(
            validate_claims(&c, now),
            Err(TokenValidationError::NotYetValid)
        );
    }

    #[test]
    fn rejects_inverted_time_window() {
        let now = Utc::now();
        let c = claims(now, now - Duration::minutes(5));
        assert_eq!(
            validate_claims(&c, now),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }
}
