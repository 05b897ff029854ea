//! Authenticated GET client for the Planning Center API.

use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::TokenManager;
use crate::error::ConnectorError;

/// Credentials attached to every upstream call.
pub enum Credentials {
    /// Basic Auth with a personal access token pair.
    Static { app_id: String, secret: String },
    /// Bearer token managed by the OAuth lifecycle.
    OAuth(Arc<TokenManager>),
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

enum Authorization<'a> {
    Basic { app_id: &'a str, secret: &'a str },
    Bearer(&'a str),
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, base_url: &str, credentials: Credentials) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Build the shared HTTP client with a bounded timeout.
    pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ConnectorError> {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(concat!("pco-connector/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConnectorError::Internal(format!("Failed to build HTTP client: {e}")))
    }

    /// GET `path` with `query`, returning the parsed JSON body.
    ///
    /// In OAuth mode a 401 triggers one forced refresh and one retry; a second
    /// 401 becomes `ReauthorizationRequired`. A token refreshed on the way in
    /// counts as that refresh, so a 401 on it fails without retrying.
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ConnectorError> {
        match &self.credentials {
            Credentials::Static { app_id, secret } => {
                self.send(path, query, Authorization::Basic { app_id, secret })
                    .await
            }
            Credentials::OAuth(tokens) => {
                let access = tokens.access_token().await?;
                match self.send(path, query, Authorization::Bearer(&access.token)).await {
                    // Already refreshed in this call; a second refresh would not help.
                    Err(ConnectorError::AuthRejected(body)) if access.refreshed => {
                        warn!("Freshly refreshed token rejected for {path}: {body}");
                        Err(ConnectorError::ReauthorizationRequired)
                    }
                    Err(ConnectorError::AuthRejected(_)) => {
                        warn!("Planning Center rejected the access token for {path}; refreshing once");
                        let token = tokens.force_refresh().await?;
                        match self.send(path, query, Authorization::Bearer(&token)).await {
                            Err(ConnectorError::AuthRejected(body)) => {
                                warn!("Refreshed token also rejected for {path}: {body}");
                                Err(ConnectorError::ReauthorizationRequired)
                            }
                            other => other,
                        }
                    }
                    other => other,
                }
            }
        }
    }

    async fn send(
        &self,
        path: &str,
        query: &[(&str, String)],
        auth: Authorization<'_>,
    ) -> Result<Value, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.http.get(&url).header(ACCEPT, "application/json").query(query);
        let request = match auth {
            Authorization::Basic { app_id, secret } => request.basic_auth(app_id, Some(secret)),
            Authorization::Bearer(token) => request.bearer_auth(token),
        };

        let resp = request.send().await.map_err(|e| {
            ConnectorError::UpstreamUnavailable(format!("Request to {path} failed: {e}"))
        })?;

        let status = resp.status();
        debug!("GET {path} -> {status}");

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, path, body));
        }

        resp.json().await.map_err(|e| ConnectorError::UpstreamError {
            status: status.as_u16(),
            body: format!("Invalid JSON from {path}: {e}"),
        })
    }
}

/// Map a non-success upstream status onto the error taxonomy.
pub fn classify_status(status: StatusCode, path: &str, body: String) -> ConnectorError {
    match status {
        StatusCode::UNAUTHORIZED => ConnectorError::AuthRejected(body),
        StatusCode::NOT_FOUND => ConnectorError::NotFound(format!("Planning Center resource {path}")),
        StatusCode::TOO_MANY_REQUESTS => {
            ConnectorError::UpstreamUnavailable(format!("{path} was rate limited (429)"))
        }
        s if s.is_server_error() => {
            ConnectorError::UpstreamUnavailable(format!("{path} returned {s}"))
        }
        s => ConnectorError::UpstreamError {
            status: s.as_u16(),
            body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::StateSigner;
    use crate::providers::PlanningCenterProvider;
    use crate::store::{CredentialPair, CredentialStore, MemoryCredentialStore};
    use chrono::{Duration, Utc};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn static_client(server: &MockServer) -> UpstreamClient {
        UpstreamClient::new(
            reqwest::Client::new(),
            &server.uri(),
            Credentials::Static {
                app_id: "app".into(),
                secret: "secret".into(),
            },
        )
    }

    async fn oauth_client(server: &MockServer) -> UpstreamClient {
        oauth_client_expiring(server, Utc::now() + Duration::hours(1)).await
    }

    async fn oauth_client_expiring(
        server: &MockServer,
        expires_at: chrono::DateTime<Utc>,
    ) -> UpstreamClient {
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .put(&CredentialPair {
                access_token: "at-stale".into(),
                refresh_token: Some("rt-1".into()),
                expires_at: Some(expires_at),
                token_type: "bearer".into(),
                scope: None,
                obtained_at: Utc::now(),
            })
            .await
            .unwrap();

        let provider = PlanningCenterProvider::new(
            "cid".into(),
            "csecret".into(),
            &server.uri(),
            reqwest::Client::new(),
        );
        let tokens = TokenManager::new(
            Arc::new(provider),
            store,
            StateSigner::new("client-test-secret").unwrap(),
            "https://connector.example.org/auth/callback".into(),
            vec!["people".into()],
        );
        UpstreamClient::new(reqwest::Client::new(), &server.uri(), Credentials::OAuth(Arc::new(tokens)))
    }

    fn refreshed_token() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-fresh",
            "refresh_token": "rt-2",
            "token_type": "bearer",
            "expires_in": 7200,
        }))
    }

    #[tokio::test]
    async fn test_static_mode_sends_basic_auth() {
        let server = MockServer::start().await;
        // base64("app:secret")
        Mock::given(method("GET"))
            .and(path("/people/v2/people"))
            .and(header("authorization", "Basic YXBwOnNlY3JldA=="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let body = static_client(&server)
            .get("/people/v2/people", &[("per_page", "5".to_string())])
            .await
            .unwrap();
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        for (p, code) in [("/missing", 404), ("/busy", 429), ("/down", 503), ("/teapot", 418), ("/denied", 401)] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(code).set_body_string("nope"))
                .expect(1)
                .mount(&server)
                .await;
        }

        let client = static_client(&server);
        assert!(matches!(client.get("/missing", &[]).await, Err(ConnectorError::NotFound(_))));
        assert!(matches!(client.get("/busy", &[]).await, Err(ConnectorError::UpstreamUnavailable(_))));
        assert!(matches!(client.get("/down", &[]).await, Err(ConnectorError::UpstreamUnavailable(_))));
        assert!(matches!(
            client.get("/teapot", &[]).await,
            Err(ConnectorError::UpstreamError { status: 418, ref body }) if body == "nope"
        ));
        // Static mode never retries a 401.
        assert!(matches!(client.get("/denied", &[]).await, Err(ConnectorError::AuthRejected(_))));
    }

    #[tokio::test]
    async fn test_oauth_401_refreshes_once_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/v2/service_types"))
            .and(header("authorization", "Bearer at-stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/v2/service_types"))
            .and(header("authorization", "Bearer at-fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(refreshed_token())
            .expect(1)
            .mount(&server)
            .await;

        let client = oauth_client(&server).await;
        client.get("/services/v2/service_types", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_oauth_second_401_requires_reauthorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/v2/service_types"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(refreshed_token())
            .expect(1)
            .mount(&server)
            .await;

        let client = oauth_client(&server).await;
        let err = client.get("/services/v2/service_types", &[]).await.unwrap_err();
        assert!(matches!(err, ConnectorError::ReauthorizationRequired));
    }

    #[tokio::test]
    async fn test_401_after_refresh_on_entry_does_not_refresh_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/v2/service_types"))
            .and(header("authorization", "Bearer at-fresh"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(refreshed_token())
            .expect(1)
            .mount(&server)
            .await;

        let client = oauth_client_expiring(&server, Utc::now() - Duration::minutes(5)).await;
        let err = client.get("/services/v2/service_types", &[]).await.unwrap_err();
        assert!(matches!(err, ConnectorError::ReauthorizationRequired));
    }
}
