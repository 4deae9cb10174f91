//! Authenticated HTTP client for the Fables API
//!
//! Wraps reqwest::Client; every call runs the session guard first and
//! attaches the access token as a bearer credential.

use anyhow::{bail, Context, Result};

use crate::auth::{SessionGuard, SessionStatus};

pub struct SessionClient {
    http: reqwest::Client,
    base_url: String,
    guard: SessionGuard,
}

impl SessionClient {
    pub fn new(http: reqwest::Client, base_url: &str, guard: SessionGuard) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            guard,
        }
    }

    async fn access_token(&self) -> Result<String> {
        if self.guard.ensure_valid().await == SessionStatus::Unauthenticated {
            bail!("Not signed in. Run 'fables-session set-tokens' after logging in.");
        }
        self.guard
            .store()
            .access_token()
            .context("Session was cleared while the request was being prepared")
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET a protected resource.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST JSON to a protected resource.
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Session may be revoked -- sign in again.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::tests::jwt;
    use crate::auth::{HttpRefreshTransport, TokenStore};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn client_for(server: &mockito::ServerGuard, store: Arc<TokenStore>) -> SessionClient {
        let transport = Arc::new(HttpRefreshTransport::with_client(
            reqwest::Client::new(),
            &server.url(),
        ));
        let guard = SessionGuard::new(store, transport);
        SessionClient::new(reqwest::Client::new(), &server.url(), guard)
    }

    #[tokio::test]
    async fn test_get_with_valid_token() {
        let mut server = mockito::Server::new_async().await;
        let access = jwt(&json!({ "exp": Utc::now().timestamp() + 600 }));
        let mock = server
            .mock("GET", "/campaigns")
            .match_header("authorization", format!("Bearer {}", access).as_str())
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;

        let store = Arc::new(TokenStore::memory_only());
        store.set_pair(&access, "R1").unwrap();

        let body = client_for(&server, store)
            .get("/campaigns")
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        assert_eq!(body, r#"{"data":[]}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_refreshes_expired_token_first() {
        let mut server = mockito::Server::new_async().await;
        let fresh = jwt(&json!({ "exp": Utc::now().timestamp() + 600 }));
        let refresh = server
            .mock("POST", "/account/token/refresh")
            .with_status(200)
            .with_body(
                json!({ "data": { "tokens": { "accessToken": fresh, "refreshToken": "R2" } } })
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let campaigns = server
            .mock("POST", "/campaigns")
            .match_header("authorization", format!("Bearer {}", fresh).as_str())
            .match_body(mockito::Matcher::Json(json!({ "name": "Curse of Strahd" })))
            .with_status(201)
            .create_async()
            .await;

        let store = Arc::new(TokenStore::memory_only());
        store
            .set_pair(&jwt(&json!({ "exp": Utc::now().timestamp() - 10 })), "R1")
            .unwrap();

        client_for(&server, store.clone())
            .post("campaigns", &json!({ "name": "Curse of Strahd" }))
            .await
            .unwrap();

        refresh.assert_async().await;
        campaigns.assert_async().await;
        assert_eq!(store.refresh_token().as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_get_without_session_fails_before_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/campaigns")
            .expect(0)
            .create_async()
            .await;

        let err = client_for(&server, Arc::new(TokenStore::memory_only()))
            .get("/campaigns")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Not signed in"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/quests")
            .with_status(401)
            .create_async()
            .await;

        let store = Arc::new(TokenStore::memory_only());
        store
            .set_pair(&jwt(&json!({ "exp": Utc::now().timestamp() + 600 })), "R1")
            .unwrap();

        let err = client_for(&server, store).get("/quests").await.unwrap_err();
        assert!(err.to_string().contains("401 Unauthorized"));
    }
}
