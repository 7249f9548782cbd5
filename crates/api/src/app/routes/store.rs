use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use surplus_auth::Action;
use surplus_infra::jobs::JobId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/store/listings", get(store_listings))
        .route("/store/orders", get(store_orders))
        .route("/store/stats", get(store_stats))
        .route("/store/reports", post(request_report))
        .route("/store/reports/:id", get(get_report))
}

pub async fn store_listings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::StoreListingsQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::StoreListingsRead, None) {
        return resp;
    }

    let items = services.store_listings(principal.user_id(), &query);
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn store_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::StoreOrdersRead, None) {
        return resp;
    }

    let items = services.store_orders(principal.user_id());
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn store_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::StoreStatsRead, None) {
        return resp;
    }

    (StatusCode::OK, Json(services.store_stats(principal.user_id()))).into_response()
}

pub async fn request_report(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::ReportRequest, None) {
        return resp;
    }

    let job_id = services.request_report(principal.user_id());
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "job_id": job_id.to_string() })),
    )
        .into_response()
}

pub async fn get_report(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::ReportRead, None) {
        return resp;
    }

    let job_id = match id.parse::<uuid::Uuid>() {
        Ok(v) => JobId::from_uuid(v),
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id");
        }
    };

    match services.report_for(principal.user_id(), job_id) {
        Some(job) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": job.id.to_string(),
                "status": job.status,
                "result": job.result,
                "created_at": job.created_at,
                "updated_at": job.updated_at,
            })),
        )
            .into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "report not found"),
    }
}
