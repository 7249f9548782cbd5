use axum::{Json, Router, extract::Extension, http::StatusCode, response::IntoResponse, routing::get};

use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/whoami", get(whoami))
}

pub async fn health() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "healthy"}))).into_response()
}

/// Echo the authenticated identity (diagnostics + smoke tests).
pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "user_id": principal.user_id().to_string(),
            "role": principal.role().as_str(),
        })),
    )
        .into_response()
}
