//! Route-entry hook for protected views

use super::guard::{SessionGuard, SessionStatus};

/// Where navigation goes after the hook has run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect(String),
}

/// Settings for [`fresh_token`]
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    /// Path of the sign-in view
    pub login_path: String,
    /// Also redirect when the session holds no refresh token, even if the
    /// access token is still valid
    pub require_refresh_token: bool,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            require_refresh_token: true,
        }
    }
}

/// Run before entering a protected view.
pub async fn fresh_token(guard: &SessionGuard, policy: &RoutePolicy) -> Navigation {
    let redirect = || Navigation::Redirect(policy.login_path.clone());

    if guard.ensure_valid().await == SessionStatus::Unauthenticated {
        tracing::info!("Session not authenticated, redirecting to {}", policy.login_path);
        return redirect();
    }

    if policy.require_refresh_token && guard.store().refresh_token().is_none() {
        tracing::info!("No refresh token held, redirecting to {}", policy.login_path);
        return redirect();
    }

    Navigation::Proceed
}
