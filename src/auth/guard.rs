//! Session guard: keeps the access token fresh before protected work
//!
//! At most one refresh is in flight at any time. The first caller that finds
//! the token expired publishes a shared handle to the refresh while holding
//! the pending-slot lock; every later caller awaits a clone of that handle.
//! The refresh clears the slot itself before it resolves, so the slot is
//! occupied for exactly as long as the transport call runs.
//!
//! A refresh only commits (or clears) if the session is unchanged since it
//! started; a logout or new sign-in in the meantime wins.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};

use super::tokens::TokenStore;
use super::transport::RefreshTransport;

/// Outcome of [`SessionGuard::ensure_valid`].
///
/// `Unauthenticated` is an ordinary result; callers send the user to sign in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Valid,
    Unauthenticated,
}

type PendingRefresh = Shared<BoxFuture<'static, SessionStatus>>;

struct Inner {
    store: Arc<TokenStore>,
    transport: Arc<dyn RefreshTransport>,
    pending: Mutex<Option<PendingRefresh>>,
}

#[derive(Clone)]
pub struct SessionGuard {
    inner: Arc<Inner>,
}

impl SessionGuard {
    pub fn new(store: Arc<TokenStore>, transport: Arc<dyn RefreshTransport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.pending_slot().is_some()
    }

    /// Make sure the access token is usable, refreshing it if needed.
    ///
    /// Returns immediately without suspending when the token is still valid.
    /// Concurrent callers that find it expired share a single refresh.
    pub async fn ensure_valid(&self) -> SessionStatus {
        if !self.inner.store.is_expired() {
            return SessionStatus::Valid;
        }

        let pending = {
            let mut slot = self.inner.pending_slot();
            match slot.as_ref() {
                Some(pending) => {
                    tracing::debug!("Joining in-flight session refresh");
                    pending.clone()
                }
                None => {
                    // A refresh may have landed between the check above and
                    // taking the lock
                    if !self.inner.store.is_expired() {
                        return SessionStatus::Valid;
                    }

                    let Some((refresh_token, generation)) = self.inner.store.refresh_ticket()
                    else {
                        tracing::debug!("Access token expired and no refresh token held");
                        return SessionStatus::Unauthenticated;
                    };

                    // The future only holds a weak handle back to the slot
                    // that owns it
                    let pending = refresh(
                        self.inner.store.clone(),
                        self.inner.transport.clone(),
                        Arc::downgrade(&self.inner),
                        refresh_token,
                        generation,
                    )
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Drop the session entirely.
    ///
    /// A refresh still in flight will find the session changed and discard
    /// whatever it gets back.
    pub fn logout(&self) {
        if self.is_refreshing() {
            tracing::debug!("Logging out while a refresh is in flight");
        }
        self.inner.store.clear();
        tracing::info!("Logged out");
    }
}

impl Inner {
    fn pending_slot(&self) -> MutexGuard<'_, Option<PendingRefresh>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }
}

async fn refresh(
    store: Arc<TokenStore>,
    transport: Arc<dyn RefreshTransport>,
    owner: Weak<Inner>,
    refresh_token: String,
    generation: u64,
) -> SessionStatus {
    tracing::debug!("Access token expired, refreshing session");

    let committed = match transport.refresh(&refresh_token).await {
        Ok(issued) => {
            match store.set_pair_if_unchanged(
                generation,
                &issued.access_token,
                &issued.refresh_token,
            ) {
                Ok(true) => {
                    tracing::info!("Session refreshed");
                    Some(SessionStatus::Valid)
                }
                Ok(false) => None,
                Err(e) => {
                    tracing::warn!("Refresh returned an unusable access token: {}", e);
                    store
                        .clear_if_unchanged(generation)
                        .then_some(SessionStatus::Unauthenticated)
                }
            }
        }
        Err(e) => {
            tracing::warn!("Session refresh failed: {}", e);
            store
                .clear_if_unchanged(generation)
                .then_some(SessionStatus::Unauthenticated)
        }
    };

    let status = committed.unwrap_or_else(|| {
        tracing::debug!("Session changed during refresh, discarding the result");
        if store.is_expired() {
            SessionStatus::Unauthenticated
        } else {
            SessionStatus::Valid
        }
    });

    if let Some(inner) = owner.upgrade() {
        inner.pending_slot().take();
    }
    status
}
