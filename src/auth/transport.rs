//! Refresh endpoint client
//!
//! `POST <base>/account/token/refresh` exchanges a refresh token for a new
//! access/refresh pair.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::TransportError;

const REFRESH_PATH: &str = "/account/token/refresh";

/// Freshly issued token pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Exchanges a refresh token for a new token pair.
///
/// Timeouts are the transport's job and come back as an ordinary error.
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, TransportError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Response envelope from the account service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub data: Option<RefreshData>,
    pub message: Option<String>,
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshData {
    pub tokens: Option<ResponseTokens>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl RefreshResponse {
    /// Pull the token pair out, requiring both values to be non-empty.
    pub fn into_tokens(self) -> Result<IssuedTokens, TransportError> {
        let tokens = self
            .data
            .ok_or(TransportError::MalformedBody("data"))?
            .tokens
            .ok_or(TransportError::MalformedBody("data.tokens"))?;

        let access_token = tokens
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(TransportError::MalformedBody("data.tokens.accessToken"))?;
        let refresh_token = tokens
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or(TransportError::MalformedBody("data.tokens.refreshToken"))?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
        })
    }
}

/// [`RefreshTransport`] over HTTP
pub struct HttpRefreshTransport {
    http: reqwest::Client,
    url: String,
}

impl HttpRefreshTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            url: format!("{}{}", base_url.trim_end_matches('/'), REFRESH_PATH),
        }
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, TransportError> {
        tracing::debug!("Refreshing session at {}", self.url);

        let resp = self
            .http
            .post(&self.url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        let parsed: RefreshResponse = serde_json::from_slice(&body)
            .map_err(|_| TransportError::MalformedBody("a JSON body"))?;
        tracing::debug!(
            "Refresh response: status={:?} {:?} message={:?} at {:?}",
            parsed.status,
            parsed.status_text,
            parsed.message,
            parsed.timestamp
        );
        parsed.into_tokens()
    }
}
