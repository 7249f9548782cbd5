use axum::Router;

pub mod balance;
pub mod listings;
pub mod orders;
pub mod store;
pub mod stream;
pub mod system;

/// Routes reachable without authentication.
pub fn public_router() -> Router {
    listings::public_router()
}

/// Routes behind the bearer-token middleware.
pub fn router() -> Router {
    Router::new()
        .merge(listings::router())
        .merge(orders::router())
        .merge(balance::router())
        .merge(store::router())
        .merge(stream::router())
        .merge(system::router())
}
