use axum::http::StatusCode;

use surplus_auth::{Action, authorize};
use surplus_core::UserId;

use crate::app::errors;
use crate::context::PrincipalContext;

/// Gate a handler behind the policy function.
///
/// Every protected endpoint calls this exactly once before touching domain
/// code, so the access matrix lives in `surplus-auth` and nowhere else.
pub fn require(
    principal: &PrincipalContext,
    action: Action,
    resource_owner: Option<UserId>,
) -> Result<(), axum::response::Response> {
    authorize(&principal.principal(), action, resource_owner)
        .map_err(|e| errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}
