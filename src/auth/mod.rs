//! Session authentication for the Fables API
//!
//! [`TokenStore`] owns the access/refresh pair. [`SessionGuard`] keeps the
//! access token fresh through the account service's refresh endpoint and
//! collapses concurrent refreshes into one call.

pub mod claims;
pub mod error;
pub mod guard;
pub mod route;
pub mod tokens;
pub mod transport;

pub use guard::{SessionGuard, SessionStatus};
pub use route::{fresh_token, Navigation, RoutePolicy};
pub use tokens::TokenStore;
pub use transport::HttpRefreshTransport;
