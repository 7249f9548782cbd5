use thiserror::Error;

use surplus_core::UserId;

use crate::principal::Principal;
use crate::roles::Role;

/// An action a principal may attempt against the system.
///
/// Every mutating (and role-scoped read) endpoint maps to exactly one action
/// before touching any domain code, so the full access matrix lives in this
/// module and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ListingCreate,
    ListingUpdate,
    ListingDelete,
    StoreListingsRead,
    StoreOrdersRead,
    StoreStatsRead,
    ReportRequest,
    ReportRead,
    OrderPlace,
    OrderConfirm,
    OrderCancel,
    OrderComplete,
    OrderRefund,
    OrdersRead,
    BalanceRead,
    BalanceDeposit,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ListingCreate => "listings.create",
            Action::ListingUpdate => "listings.update",
            Action::ListingDelete => "listings.delete",
            Action::StoreListingsRead => "store.listings.read",
            Action::StoreOrdersRead => "store.orders.read",
            Action::StoreStatsRead => "store.stats.read",
            Action::ReportRequest => "store.reports.request",
            Action::ReportRead => "store.reports.read",
            Action::OrderPlace => "orders.place",
            Action::OrderConfirm => "orders.confirm",
            Action::OrderCancel => "orders.cancel",
            Action::OrderComplete => "orders.complete",
            Action::OrderRefund => "orders.refund",
            Action::OrdersRead => "orders.read",
            Action::BalanceRead => "balance.read",
            Action::BalanceDeposit => "balance.deposit",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: role may not perform '{0}'")]
    RoleDenied(String),

    #[error("forbidden: not the owner of the target resource")]
    NotOwner,
}

/// Authorize a principal for an action, optionally scoped to a resource owner.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
///
/// `resource_owner` carries the owning user of the target resource when the
/// action is ownership-scoped (e.g. updating a listing). Buyer-scoped order
/// lookups deliberately do **not** pass an owner here: a mismatched buyer is
/// reported as not-found by the domain, never as a policy denial.
pub fn authorize(
    principal: &Principal,
    action: Action,
    resource_owner: Option<UserId>,
) -> Result<(), AuthzError> {
    if !role_allows(principal.role, action) {
        return Err(AuthzError::RoleDenied(action.as_str().to_string()));
    }

    if let Some(owner) = resource_owner {
        if owner != principal.user_id {
            return Err(AuthzError::NotOwner);
        }
    }

    Ok(())
}

fn role_allows(role: Role, action: Action) -> bool {
    match action {
        Action::ListingCreate
        | Action::ListingUpdate
        | Action::ListingDelete
        | Action::StoreListingsRead
        | Action::StoreOrdersRead
        | Action::StoreStatsRead
        | Action::ReportRequest
        | Action::ReportRead => role == Role::Store,

        Action::OrderPlace
        | Action::OrderConfirm
        | Action::OrderCancel
        | Action::OrderComplete
        | Action::OrderRefund
        | Action::OrdersRead => role == Role::Customer,

        Action::BalanceRead | Action::BalanceDeposit => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> Principal {
        Principal::new(UserId::new(), Role::Customer)
    }

    fn store() -> Principal {
        Principal::new(UserId::new(), Role::Store)
    }

    #[test]
    fn store_manages_listings_customer_does_not() {
        assert!(authorize(&store(), Action::ListingCreate, None).is_ok());
        assert!(authorize(&store(), Action::ListingUpdate, None).is_ok());
        assert!(authorize(&store(), Action::ListingDelete, None).is_ok());

        for action in [
            Action::ListingCreate,
            Action::ListingUpdate,
            Action::ListingDelete,
        ] {
            let err = authorize(&customer(), action, None).unwrap_err();
            assert!(matches!(err, AuthzError::RoleDenied(_)));
        }
    }

    #[test]
    fn customer_drives_the_order_lifecycle() {
        for action in [
            Action::OrderPlace,
            Action::OrderConfirm,
            Action::OrderCancel,
            Action::OrderComplete,
            Action::OrderRefund,
            Action::OrdersRead,
        ] {
            assert!(authorize(&customer(), action, None).is_ok());
            assert!(authorize(&store(), action, None).is_err());
        }
    }

    #[test]
    fn balance_actions_are_role_agnostic() {
        for p in [customer(), store()] {
            assert!(authorize(&p, Action::BalanceRead, None).is_ok());
            assert!(authorize(&p, Action::BalanceDeposit, None).is_ok());
        }
    }

    #[test]
    fn ownership_scoping_rejects_non_owners() {
        let p = store();
        assert!(authorize(&p, Action::ListingUpdate, Some(p.user_id)).is_ok());

        let err = authorize(&p, Action::ListingUpdate, Some(UserId::new())).unwrap_err();
        assert_eq!(err, AuthzError::NotOwner);
    }

    #[test]
    fn role_denial_wins_over_ownership() {
        let p = customer();
        let err = authorize(&p, Action::ListingDelete, Some(p.user_id)).unwrap_err();
        assert!(matches!(err, AuthzError::RoleDenied(_)));
    }
}
