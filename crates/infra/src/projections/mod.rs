//! Disposable read models fed from published event envelopes.
//!
//! Projections are idempotent for at-least-once delivery: each one keeps a
//! per-stream cursor and ignores replayed envelopes at or below it.

pub mod balances;
pub mod listings;
pub mod orders;

pub use balances::{BalanceReadModel, BalancesProjection, BalancesProjectionError};
pub use listings::{ListingReadModel, ListingsProjection, ListingsProjectionError};
pub use orders::{OrderLineReadModel, OrderReadModel, OrdersProjection, OrdersProjectionError};
