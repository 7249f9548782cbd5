//! `surplus-auth` — pure authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage. Token
//! decoding/signature verification lives in the transport layer; this crate
//! validates claims and makes policy decisions.

pub mod claims;
pub mod policy;
pub mod principal;
pub mod roles;

pub use claims::{AccessClaims, TokenValidationError, validate_claims};
pub use policy::{Action, AuthzError, authorize};
pub use principal::Principal;
pub use roles::Role;
