use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Owner id stamped on rows created without a signed-in user.
pub const GUEST: &str = "guest";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UserScope {
    #[default]
    Guest,
    User(String),
}

impl UserScope {
    /// A blank or `"guest"` id maps to the guest scope.
    pub fn from_user_id(user_id: Option<&str>) -> Self {
        match user_id.map(str::trim) {
            Some(id) if !id.is_empty() && id != GUEST => Self::User(id.to_string()),
            _ => Self::Guest,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::Guest => GUEST,
            Self::User(id) => id,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl fmt::Display for UserScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_id())
    }
}

/// Shared view of who is signed in. The sign-in protocol itself lives
/// outside this crate; whatever performs it reports the outcome here.
#[derive(Clone)]
pub struct AuthState {
    scope: Arc<watch::Sender<UserScope>>,
}

impl AuthState {
    pub fn new(initial: UserScope) -> Self {
        let (scope, _) = watch::channel(initial);
        Self {
            scope: Arc::new(scope),
        }
    }

    pub fn current(&self) -> UserScope {
        self.scope.borrow().clone()
    }

    /// Sets the scope and returns the previous one.
    pub fn set(&self, scope: UserScope) -> UserScope {
        tracing::debug!("Auth state changed. User: {}", scope);
        self.scope.send_replace(scope)
    }

    pub fn subscribe(&self) -> watch::Receiver<UserScope> {
        self.scope.subscribe()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new(UserScope::Guest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_sentinel_is_not_a_user() {
        assert_eq!(UserScope::from_user_id(None), UserScope::Guest);
        assert_eq!(UserScope::from_user_id(Some("  ")), UserScope::Guest);
        assert_eq!(UserScope::from_user_id(Some("guest")), UserScope::Guest);
        assert_eq!(
            UserScope::from_user_id(Some("abc")),
            UserScope::User("abc".to_string())
        );
        assert_eq!(UserScope::Guest.user_id(), GUEST);
    }

    #[test]
    fn set_returns_previous_scope() {
        let auth = AuthState::default();
        let mut rx = auth.subscribe();

        let previous = auth.set(UserScope::User("u1".to_string()));

        assert_eq!(previous, UserScope::Guest);
        assert!(auth.current().is_authenticated());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().user_id(), "u1");
    }
}
