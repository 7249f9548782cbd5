use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use surplus_auth::Action;
use surplus_catalog::ListingId;
use surplus_core::AggregateId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

/// Unauthenticated browse endpoint: only available listings are shown.
pub fn public_router() -> Router {
    Router::new().route("/listings", get(browse_listings))
}

pub fn router() -> Router {
    Router::new()
        .route("/listings", post(create_listing))
        .route("/listings/:id", axum::routing::put(update_listing).delete(delete_listing))
}

fn parse_listing_id(id: &str) -> Result<ListingId, axum::response::Response> {
    let agg: AggregateId = id.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid listing id")
    })?;
    Ok(ListingId::new(agg))
}

pub async fn browse_listings(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::BrowseListingsQuery>,
) -> axum::response::Response {
    let items = services.browse_listings(&query);
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn create_listing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateListingRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::ListingCreate, None) {
        return resp;
    }

    match services.create_listing(principal.user_id(), body) {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_listing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateListingRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::ListingUpdate, None) {
        return resp;
    }

    let listing_id = match parse_listing_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.update_listing(principal.user_id(), listing_id, body) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn delete_listing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::ListingDelete, None) {
        return resp;
    }

    let listing_id = match parse_listing_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.delete_listing(principal.user_id(), listing_id) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"message": "listing deleted"})),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
