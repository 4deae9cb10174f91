//! Token storage and management

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::claims::{decode_claims, Claims};
use super::error::DecodeError;
use crate::storage::{KeyValueStore, StorageError, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Snapshot of the raw tokens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Default)]
struct State {
    access_token: Option<String>,
    refresh_token: Option<String>,
    /// Present exactly when `access_token` is
    claims: Option<Claims>,
    /// Bumped by every mutation, survives `clear`
    generation: u64,
}

impl State {
    fn commit_pair(&mut self, access_token: &str, claims: Claims, refresh_token: &str) {
        self.access_token = Some(access_token.to_string());
        self.claims = Some(claims);
        self.refresh_token = Some(refresh_token.to_string()).filter(|t| !t.is_empty());
        self.generation += 1;
    }

    fn reset(&mut self) {
        *self = State {
            generation: self.generation + 1,
            ..State::default()
        };
    }
}

/// Owner of the access/refresh pair and the claims decoded from it.
///
/// Every mutation is mirrored to the persisted store when there is one.
/// A storage failure is logged and the in-memory state stays authoritative.
pub struct TokenStore {
    state: RwLock<State>,
    storage: Option<Arc<dyn KeyValueStore>>,
}

impl TokenStore {
    /// Create the store, hydrating it once from `storage` if present.
    pub fn new(storage: Option<Arc<dyn KeyValueStore>>) -> Self {
        let store = Self {
            state: RwLock::new(State::default()),
            storage,
        };
        store.hydrate();
        store
    }

    /// A store with no persistence at all.
    #[cfg(test)]
    pub fn memory_only() -> Self {
        Self::new(None)
    }

    fn hydrate(&self) {
        let Some(storage) = &self.storage else {
            tracing::debug!("No persisted storage, session is memory-only");
            return;
        };

        let access = read_key(storage.as_ref(), ACCESS_TOKEN_KEY);
        let refresh = read_key(storage.as_ref(), REFRESH_TOKEN_KEY).filter(|t| !t.is_empty());

        let mut state = self.write();
        state.refresh_token = refresh;

        if let Some(token) = access {
            match decode_claims(&token) {
                Ok(claims) => {
                    state.access_token = Some(token);
                    state.claims = Some(claims);
                }
                Err(e) => {
                    tracing::warn!("Discarding persisted access token: {}", e);
                    self.persist_remove(ACCESS_TOKEN_KEY);
                }
            }
        }

        tracing::debug!(
            "Hydrated session (access: {}, refresh: {})",
            state.access_token.is_some(),
            state.refresh_token.is_some()
        );
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Store a new access token.
    ///
    /// The token is decoded first. If that fails the session drops to
    /// unauthenticated (access token and claims cleared, persisted entry
    /// removed) and the error is returned after being logged.
    pub fn set_access_token(&self, token: &str) -> Result<(), DecodeError> {
        match decode_claims(token) {
            Ok(claims) => {
                let mut state = self.write();
                state.access_token = Some(token.to_string());
                state.claims = Some(claims);
                state.generation += 1;
                self.persist_set(ACCESS_TOKEN_KEY, token);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Rejected access token: {}", e);
                let mut state = self.write();
                state.access_token = None;
                state.claims = None;
                state.generation += 1;
                self.persist_remove(ACCESS_TOKEN_KEY);
                Err(e)
            }
        }
    }

    /// Store a new refresh token. An empty token is the same as none.
    pub fn set_refresh_token(&self, token: &str) {
        let mut state = self.write();
        state.generation += 1;
        if token.is_empty() {
            state.refresh_token = None;
            self.persist_remove(REFRESH_TOKEN_KEY);
        } else {
            state.refresh_token = Some(token.to_string());
            self.persist_set(REFRESH_TOKEN_KEY, token);
        }
    }

    /// Replace both tokens at once.
    ///
    /// The access token is decoded before anything changes; on failure the
    /// current pair is left untouched.
    pub fn set_pair(&self, access_token: &str, refresh_token: &str) -> Result<(), DecodeError> {
        let claims = decode_claims(access_token)?;

        let mut state = self.write();
        state.commit_pair(access_token, claims, refresh_token);
        self.persist_pair(&state);
        Ok(())
    }

    /// [`set_pair`](Self::set_pair), but only if nothing has changed the
    /// session since `generation` was observed. Returns whether it committed.
    pub fn set_pair_if_unchanged(
        &self,
        generation: u64,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<bool, DecodeError> {
        let claims = decode_claims(access_token)?;

        let mut state = self.write();
        if state.generation != generation {
            return Ok(false);
        }
        state.commit_pair(access_token, claims, refresh_token);
        self.persist_pair(&state);
        Ok(true)
    }

    /// Store the pair handed out by the login endpoint.
    ///
    /// The refresh token is kept even when the access token is rejected, so
    /// the next guard check can still refresh the session.
    pub fn sign_in(&self, access_token: &str, refresh_token: &str) -> Result<(), DecodeError> {
        if self.set_pair(access_token, refresh_token).is_ok() {
            return Ok(());
        }
        self.set_refresh_token(refresh_token);
        self.set_access_token(access_token)
    }

    /// Forget both tokens and their claims. Idempotent.
    pub fn clear(&self) {
        let mut state = self.write();
        self.clear_locked(&mut state);
    }

    /// [`clear`](Self::clear), but only if nothing has changed the session
    /// since `generation` was observed. Returns whether it cleared.
    pub fn clear_if_unchanged(&self, generation: u64) -> bool {
        let mut state = self.write();
        if state.generation != generation {
            return false;
        }
        self.clear_locked(&mut state);
        true
    }

    fn clear_locked(&self, state: &mut State) {
        if state.access_token.is_some() || state.refresh_token.is_some() {
            tracing::debug!("Clearing session tokens");
        }
        state.reset();
        self.persist_remove(ACCESS_TOKEN_KEY);
        self.persist_remove(REFRESH_TOKEN_KEY);
    }

    /// The refresh token together with the generation it was read at.
    pub fn refresh_ticket(&self) -> Option<(String, u64)> {
        let state = self.read();
        state
            .refresh_token
            .clone()
            .map(|token| (token, state.generation))
    }

    /// Whether the access token cannot be shown to be valid right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    /// [`is_expired`](Self::is_expired) against an explicit clock, in seconds
    /// since the epoch.
    pub fn is_expired_at(&self, now: i64) -> bool {
        match &self.read().claims {
            Some(claims) => claims.is_expired_at(now),
            None => true,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().access_token.is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    pub fn claims(&self) -> Option<Claims> {
        self.read().claims.clone()
    }

    pub fn pair(&self) -> TokenPair {
        let state = self.read();
        TokenPair {
            access_token: state.access_token.clone(),
            refresh_token: state.refresh_token.clone(),
        }
    }

    fn persist_pair(&self, state: &State) {
        if let Some(token) = &state.access_token {
            self.persist_set(ACCESS_TOKEN_KEY, token);
        }
        match &state.refresh_token {
            Some(token) => self.persist_set(REFRESH_TOKEN_KEY, token),
            None => self.persist_remove(REFRESH_TOKEN_KEY),
        }
    }

    fn persist_set(&self, key: &str, value: &str) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.set(key, value) {
                log_storage_error("persist", key, &e);
            }
        }
    }

    fn persist_remove(&self, key: &str) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.remove(key) {
                log_storage_error("remove", key, &e);
            }
        }
    }
}

fn read_key(storage: &dyn KeyValueStore, key: &str) -> Option<String> {
    storage.get(key).unwrap_or_else(|e| {
        log_storage_error("read", key, &e);
        None
    })
}

fn log_storage_error(action: &str, key: &str, e: &StorageError) {
    tracing::warn!("Failed to {} {} in session storage: {}", action, key, e);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::tests::jwt;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn token_with_exp(exp: i64) -> String {
        jwt(&json!({ "sub": "u1", "exp": exp }))
    }

    fn persisted() -> (Arc<MemoryStore>, TokenStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = TokenStore::new(Some(backend.clone() as Arc<dyn KeyValueStore>));
        (backend, store)
    }

    #[test]
    fn test_starts_empty() {
        let store = TokenStore::memory_only();
        assert!(!store.is_authenticated());
        assert!(store.is_expired());
        assert_eq!(store.pair(), TokenPair::default());
    }

    #[test]
    fn test_set_access_token_decodes_and_persists() {
        let (backend, store) = persisted();
        let now = Utc::now().timestamp();
        let token = token_with_exp(now + 600);

        store.set_access_token(&token).unwrap();

        assert!(store.is_authenticated());
        assert!(!store.is_expired());
        assert_eq!(store.claims().and_then(|c| c.exp()), Some(now + 600));
        assert_eq!(backend.get(ACCESS_TOKEN_KEY).unwrap(), Some(token));
    }

    #[test]
    fn test_bad_access_token_leaves_unauthenticated() {
        let (backend, store) = persisted();
        store
            .set_access_token(&token_with_exp(Utc::now().timestamp() + 600))
            .unwrap();

        assert!(store.set_access_token("garbage").is_err());

        assert!(!store.is_authenticated());
        assert!(store.claims().is_none());
        assert!(store.is_expired());
        assert_eq!(backend.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_missing_exp_always_expired() {
        let store = TokenStore::memory_only();
        store.set_access_token(&jwt(&json!({ "sub": "u1" }))).unwrap();

        assert!(store.is_authenticated());
        assert!(store.is_expired_at(0));
        assert!(store.is_expired_at(i64::MIN));
    }

    #[test]
    fn test_expiry_against_clock() {
        let store = TokenStore::memory_only();
        store.set_access_token(&token_with_exp(1000)).unwrap();

        assert!(!store.is_expired_at(999));
        assert!(store.is_expired_at(1000));
        assert!(store.is_expired_at(1001));
    }

    #[test]
    fn test_empty_refresh_token_is_absent() {
        let (backend, store) = persisted();
        store.set_refresh_token("r1");
        assert_eq!(backend.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));

        store.set_refresh_token("");
        assert_eq!(store.refresh_token(), None);
        assert_eq!(backend.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_set_pair_is_atomic() {
        let (backend, store) = persisted();
        let a1 = token_with_exp(Utc::now().timestamp() + 600);
        store.set_pair(&a1, "r1").unwrap();

        assert!(store.set_pair("broken", "r2").is_err());

        assert_eq!(
            store.pair(),
            TokenPair {
                access_token: Some(a1.clone()),
                refresh_token: Some("r1".to_string()),
            }
        );
        assert_eq!(backend.get(ACCESS_TOKEN_KEY).unwrap(), Some(a1));
        assert_eq!(backend.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (backend, store) = persisted();
        store
            .set_pair(&token_with_exp(Utc::now().timestamp() + 600), "r1")
            .unwrap();

        store.clear();
        assert_eq!(store.pair(), TokenPair::default());
        assert!(!store.is_authenticated());
        assert_eq!(backend.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(backend.get(REFRESH_TOKEN_KEY).unwrap(), None);

        store.clear();
        assert_eq!(store.pair(), TokenPair::default());
        assert!(store.claims().is_none());
    }

    #[test]
    fn test_sign_in_keeps_refresh_token_when_access_rejected() {
        let (backend, store) = persisted();

        assert!(store.sign_in("garbage", "r1").is_err());

        assert!(!store.is_authenticated());
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));
        assert_eq!(backend.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));
        assert_eq!(backend.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_conditional_writes_respect_generation() {
        let (backend, store) = persisted();
        let a1 = token_with_exp(Utc::now().timestamp() + 600);
        store.set_pair(&a1, "r1").unwrap();
        let (_, seen) = store.refresh_ticket().unwrap();

        store.clear();

        let a2 = token_with_exp(Utc::now().timestamp() + 900);
        assert!(!store.set_pair_if_unchanged(seen, &a2, "r2").unwrap());
        assert_eq!(store.pair(), TokenPair::default());
        assert_eq!(backend.get(REFRESH_TOKEN_KEY).unwrap(), None);

        store.set_refresh_token("r3");
        let (_, seen) = store.refresh_ticket().unwrap();
        store.set_refresh_token("r4");
        assert!(!store.clear_if_unchanged(seen));
        assert_eq!(store.refresh_token().as_deref(), Some("r4"));

        let (token, seen) = store.refresh_ticket().unwrap();
        assert_eq!(token, "r4");
        assert!(store.set_pair_if_unchanged(seen, &a2, "r5").unwrap());
        assert_eq!(store.access_token(), Some(a2));
        assert_eq!(backend.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r5"));
    }

    #[test]
    fn test_hydrates_from_storage() {
        let backend = Arc::new(MemoryStore::new());
        let token = token_with_exp(Utc::now().timestamp() + 600);
        backend.set(ACCESS_TOKEN_KEY, &token).unwrap();
        backend.set(REFRESH_TOKEN_KEY, "r1").unwrap();

        let store = TokenStore::new(Some(backend as Arc<dyn KeyValueStore>));

        assert!(store.is_authenticated());
        assert!(!store.is_expired());
        assert_eq!(store.access_token(), Some(token));
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_hydration_drops_undecodable_token() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(ACCESS_TOKEN_KEY, "not.a.jwt").unwrap();
        backend.set(REFRESH_TOKEN_KEY, "r1").unwrap();

        let store = TokenStore::new(Some(backend.clone() as Arc<dyn KeyValueStore>));

        assert!(!store.is_authenticated());
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));
        assert_eq!(backend.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }
}
