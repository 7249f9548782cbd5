use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use surplus_auth::{AccessClaims, validate_claims};

use crate::context::PrincipalContext;

/// HS256 verifier for bearer tokens.
///
/// Signature verification happens here; claim-window validation is delegated
/// to the pure `surplus-auth` layer. Token issuance is an external
/// collaborator and not part of this service.
pub struct Hs256TokenVerifier {
    key: DecodingKey,
}

impl Hs256TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AccessClaims, StatusCode> {
        // The claims carry their own time window; `exp`/`iat` are not used.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.key, &validation)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        validate_claims(&data.claims, Utc::now()).map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(data.claims)
    }
}

#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<Hs256TokenVerifier>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;

    let claims = state.verifier.verify(token)?;

    req.extensions_mut()
        .insert(PrincipalContext::new(claims.sub, claims.role));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
