//! Access token claims
//!
//! Access tokens are JWTs. Only the payload segment is read; the signature is
//! the server's business.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};

use super::error::DecodeError;

/// Decoded JWT payload.
///
/// Opaque apart from `exp`. Replaced wholesale whenever the access token
/// changes, never edited in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Expiry in seconds since the epoch, if present and an integer.
    pub fn exp(&self) -> Option<i64> {
        self.0.get("exp").and_then(Value::as_i64)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Whether these claims are expired at `now` (seconds since the epoch).
    ///
    /// A missing or non-integer `exp` counts as expired.
    pub fn is_expired_at(&self, now: i64) -> bool {
        match self.exp() {
            Some(exp) => exp <= now,
            None => true,
        }
    }

    pub fn as_json(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Decode the payload segment of a JWT into claims.
pub fn decode_claims(token: &str) -> Result<Claims, DecodeError> {
    if token.is_empty() {
        return Err(DecodeError::Empty);
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(DecodeError::Malformed(parts.len()));
    }

    // Some issuers pad the payload, base64url-no-pad rejects that
    let payload = parts[1].trim_end_matches('=');
    let decoded = URL_SAFE_NO_PAD.decode(payload)?;

    match serde_json::from_slice::<Value>(&decoded)? {
        Value::Object(map) => Ok(Claims(map)),
        _ => Err(DecodeError::NotAnObject),
    }
}
