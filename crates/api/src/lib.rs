//! `surplus-api` — HTTP surface for the marketplace.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
