/// Source of the currently signed in user, if any.
///
/// Authentication itself lives outside of this crate, the engine
/// only ever needs the user id for the operation at hand.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// Fixed identity, e.g. taken from config or a test
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            user_id: user_id.filter(|id| !id.trim().is_empty()),
        }
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self::new(Some(user_id.into()))
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<String> {
        self.user_id.clone()
    }
}
