//! Error types for token decoding and the refresh transport

use thiserror::Error;

/// An access token could not be turned into claims.
///
/// Always recoverable: the store treats the token as unusable and the
/// session as expired.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("token is empty")]
    Empty,

    #[error("token has {0} segments, expected 3")]
    Malformed(usize),

    #[error("token payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("token payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("token payload is not a JSON object")]
    NotAnObject,
}

/// The refresh call did not yield a usable token pair.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("refresh request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("refresh endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("refresh response is missing {0}")]
    MalformedBody(&'static str),
}
