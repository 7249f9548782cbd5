use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use surplus_auth::Action;
use surplus_catalog::ListingId;
use surplus_core::AggregateId;
use surplus_orders::OrderId;

use crate::app::services::{AppServices, ServiceError};
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/orders", post(place_order).get(list_orders))
        .route("/orders/confirm/:id", post(confirm_order))
        .route("/orders/cancel/:id", post(cancel_order))
        .route("/orders/complete/:id", post(complete_order))
        .route("/orders/refund/:id", post(refund_order))
}

fn parse_order_id(id: &str) -> Result<OrderId, axum::response::Response> {
    let agg: AggregateId = id.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id")
    })?;
    Ok(OrderId::new(agg))
}

pub async fn place_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::PlaceOrderRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::OrderPlace, None) {
        return resp;
    }

    let listing_id = match body.listing_id.parse::<AggregateId>() {
        Ok(agg) => ListingId::new(agg),
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid listing id");
        }
    };

    match services.place_order(principal.user_id(), listing_id, body.quantity) {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, Action::OrdersRead, None) {
        return resp;
    }

    let items = services.buyer_orders(principal.user_id());
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

async fn transition(
    services: Arc<AppServices>,
    principal: PrincipalContext,
    action: Action,
    id: String,
    run: impl FnOnce(&AppServices, surplus_core::UserId, OrderId) -> Result<dto::OrderView, ServiceError>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, action, None) {
        return resp;
    }

    let order_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match run(&services, principal.user_id(), order_id) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn confirm_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, principal, Action::OrderConfirm, id, |s, buyer, order| {
        s.confirm_order(buyer, order)
    })
    .await
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, principal, Action::OrderCancel, id, |s, buyer, order| {
        s.cancel_order(buyer, order)
    })
    .await
}

pub async fn complete_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, principal, Action::OrderComplete, id, |s, buyer, order| {
        s.complete_order(buyer, order)
    })
    .await
}

pub async fn refund_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, principal, Action::OrderRefund, id, |s, buyer, order| {
        s.refund_order(buyer, order)
    })
    .await
}
