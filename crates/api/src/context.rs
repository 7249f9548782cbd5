use surplus_auth::{Principal, Role};
use surplus_core::UserId;

/// Principal context for a request (authenticated identity + role).
///
/// This is immutable and must be present for all protected routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
    role: Role,
}

impl PrincipalContext {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn principal(&self) -> Principal {
        Principal::new(self.user_id, self.role)
    }
}
