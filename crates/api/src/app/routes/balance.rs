use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use surplus_auth::Action;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/balance", get(get_balance))
        .route("/balance/deposit", post(deposit))
}

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::BalanceRead, None) {
        return resp;
    }

    match services.balance_of(principal.user_id()) {
        Ok(balance) => {
            (StatusCode::OK, Json(serde_json::json!({ "balance": balance }))).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn deposit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::DepositRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::BalanceDeposit, None) {
        return resp;
    }

    match services.deposit(principal.user_id(), body.amount) {
        Ok(balance) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": "balance deposited",
                "new_balance": balance,
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
