//! Authorization-code flow, token persistence and refresh-on-expiry.
//!
//! State is never held in process: it is derived from the credential store on
//! every call, so concurrent handlers only meet at `CredentialStore::put`
//! (last writer wins). A refresh token rejected because a concurrent handler
//! already rotated it is reconciled against the store instead of clearing it.
//!
//! ```text
//! Unauthenticated --begin--> AuthorizationPending --complete--> Authenticated
//!        ^                          |                              |  ^
//!        |                     exchange failed                expiry  | refresh ok
//!        +--------------------------+-------- refresh rejected -- Expired
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::crypto::StateSigner;
use crate::error::ConnectorError;
use crate::providers::{OAuthProvider, TokenSet};
use crate::store::{CredentialPair, CredentialStore};

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW_SECS: i64 = 30;

/// Upper bound on `expires_in`; keeps the expiry arithmetic in range.
const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unauthenticated,
    AuthorizationPending,
    Authenticated,
    Expired,
}

/// Result of starting the authorization-code flow.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    /// Always `AuthorizationPending`.
    pub connection_state: ConnectionState,
}

/// An access token ready for use, and whether getting it took a refresh.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub refreshed: bool,
}

/// Snapshot reported by `/auth/status`.
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub state: ConnectionState,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

pub struct TokenManager {
    provider: Arc<dyn OAuthProvider>,
    store: Arc<dyn CredentialStore>,
    signer: StateSigner,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl TokenManager {
    pub fn new(
        provider: Arc<dyn OAuthProvider>,
        store: Arc<dyn CredentialStore>,
        signer: StateSigner,
        redirect_uri: String,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            provider,
            store,
            signer,
            redirect_uri,
            scopes,
        }
    }

    /// Build the redirect to the upstream consent screen.
    ///
    /// The state's nonce becomes the one pending authorization; an older,
    /// unfinished `/connect` stops being redeemable.
    pub async fn begin_authorization(&self) -> Result<AuthorizationRequest, ConnectorError> {
        let issued = self.signer.issue_state()?;
        self.store.put_pending_state(&issued.nonce).await?;

        let state = issued.state;
        let url = self
            .provider
            .auth_url(&self.scopes, &state, &self.redirect_uri);

        info!("Starting {} authorization", self.provider.id());

        Ok(AuthorizationRequest {
            url,
            state,
            connection_state: ConnectionState::AuthorizationPending,
        })
    }

    /// Exchange the one-time code from the callback and persist the pair.
    pub async fn complete_authorization(
        &self,
        code: &str,
        state: &str,
    ) -> Result<CredentialPair, ConnectorError> {
        self.consume_state(state).await?;

        let tokens = match self.provider.exchange_code(code, &self.redirect_uri).await {
            Ok(tokens) => tokens,
            Err(e @ ConnectorError::AuthExchangeFailed(_)) => {
                return Err(self.fail_authorization(e).await);
            }
            Err(e) => return Err(e),
        };

        let pair = pair_from_tokens(tokens, None);
        self.store.put(&pair).await?;

        info!(
            "Connected to {} (expires_at: {:?})",
            self.provider.id(),
            pair.expires_at
        );
        Ok(pair)
    }

    /// Handle an `error` callback (consent denied). The state is verified and
    /// consumed first, so only the flow this service started can clear the pair.
    pub async fn reject_authorization(&self, state: &str, reason: String) -> ConnectorError {
        if let Err(e) = self.consume_state(state).await {
            return e;
        }
        self.fail_authorization(ConnectorError::AuthExchangeFailed(reason))
            .await
    }

    async fn consume_state(&self, state: &str) -> Result<(), ConnectorError> {
        let nonce = self.signer.check_state(state)?;
        if !self.store.take_pending_state(&nonce).await? {
            return Err(ConnectorError::InvalidRequest(
                "authorization state already used or superseded; start again at /connect".into(),
            ));
        }
        Ok(())
    }

    /// Drop any stored pair after a failed authorization and hand back the error.
    async fn fail_authorization(&self, err: ConnectorError) -> ConnectorError {
        warn!("Authorization failed: {err}");
        if let Err(clear_err) = self.store.clear().await {
            error!("Failed to clear credentials after authorization failure: {clear_err}");
        }
        err
    }

    /// Return a usable access token, refreshing first if the stored one expired.
    pub async fn ensure_valid(&self) -> Result<String, ConnectorError> {
        Ok(self.access_token().await?.token)
    }

    /// Like [`ensure_valid`](Self::ensure_valid), but also reports whether a
    /// refresh happened so the caller does not refresh twice in one call.
    pub async fn access_token(&self) -> Result<AccessToken, ConnectorError> {
        let pair = self
            .store
            .get()
            .await?
            .ok_or(ConnectorError::ReauthorizationRequired)?;

        if !pair.is_expired_at(Utc::now(), Duration::seconds(EXPIRY_SKEW_SECS)) {
            return Ok(AccessToken {
                token: pair.access_token,
                refreshed: false,
            });
        }

        debug!("Access token expired at {:?}; refreshing", pair.expires_at);
        let refreshed = self.refresh(&pair).await?;
        Ok(AccessToken {
            token: refreshed.access_token,
            refreshed: true,
        })
    }

    /// Refresh regardless of expiry. Used after the upstream rejects a token.
    pub async fn force_refresh(&self) -> Result<String, ConnectorError> {
        let pair = self
            .store
            .get()
            .await?
            .ok_or(ConnectorError::ReauthorizationRequired)?;

        let refreshed = self.refresh(&pair).await?;
        Ok(refreshed.access_token)
    }

    pub async fn status(&self) -> Result<TokenStatus, ConnectorError> {
        let status = match self.store.get().await? {
            None => TokenStatus {
                state: ConnectionState::Unauthenticated,
                expires_at: None,
                scope: None,
            },
            Some(pair) => TokenStatus {
                state: if pair.is_expired_at(Utc::now(), Duration::zero()) {
                    ConnectionState::Expired
                } else {
                    ConnectionState::Authenticated
                },
                expires_at: pair.expires_at,
                scope: pair.scope,
            },
        };
        Ok(status)
    }

    /// Forget the stored pair. Local only; nothing is revoked upstream.
    pub async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.store.clear().await?;
        info!("Disconnected from {}", self.provider.id());
        Ok(())
    }

    async fn refresh(&self, current: &CredentialPair) -> Result<CredentialPair, ConnectorError> {
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            return Err(self
                .fail_authorization(ConnectorError::ReauthorizationRequired)
                .await);
        };

        match self.provider.refresh_token(refresh_token).await {
            Ok(tokens) => {
                let pair = pair_from_tokens(tokens, Some(refresh_token));
                self.store.put(&pair).await?;
                info!(
                    "Refreshed {} token (expires_at: {:?})",
                    self.provider.id(),
                    pair.expires_at
                );
                Ok(pair)
            }
            Err(ConnectorError::ReauthorizationRequired) => {
                self.refresh_rejected(refresh_token).await
            }
            Err(e) => {
                error!("Failed to refresh {} token: {e}", self.provider.id());
                Err(e)
            }
        }
    }

    /// The token endpoint rejected `used`. Upstream rotates refresh tokens, so
    /// a concurrent handler may already have stored its replacement.
    async fn refresh_rejected(&self, used: &str) -> Result<CredentialPair, ConnectorError> {
        if let Some(stored) = self.rotated_pair(used).await? {
            return Ok(stored);
        }

        if self.store.clear_if_refresh_token(used).await? {
            warn!("{} refresh token rejected; credentials cleared", self.provider.id());
            return Err(ConnectorError::ReauthorizationRequired);
        }

        // Rotated between the read and the clear.
        self.rotated_pair(used)
            .await?
            .ok_or(ConnectorError::ReauthorizationRequired)
    }

    async fn rotated_pair(&self, used: &str) -> Result<Option<CredentialPair>, ConnectorError> {
        let rotated = self
            .store
            .get()
            .await?
            .filter(|p| p.refresh_token.as_deref() != Some(used));
        if rotated.is_some() {
            debug!("Refresh token already rotated by a concurrent refresh");
        }
        Ok(rotated)
    }
}

/// Build a pair from a token response. `expires_at` is derived from the same
/// response as `access_token`; a missing refresh token keeps `previous_refresh`.
fn pair_from_tokens(tokens: TokenSet, previous_refresh: Option<&str>) -> CredentialPair {
    let now = Utc::now();
    let expires_at = tokens
        .expires_in
        .map(|secs| i64::try_from(secs).unwrap_or(i64::MAX).min(MAX_EXPIRES_IN_SECS))
        .map(|secs| now + Duration::seconds(secs));

    CredentialPair {
        access_token: tokens.access_token,
        refresh_token: tokens
            .refresh_token
            .or_else(|| previous_refresh.map(String::from)),
        expires_at,
        token_type: tokens.token_type,
        scope: tokens.scope,
        obtained_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::PlanningCenterProvider;
    use crate::store::MemoryCredentialStore;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(server: &MockServer, store: Arc<dyn CredentialStore>) -> TokenManager {
        let provider = PlanningCenterProvider::new(
            "cid".into(),
            "csecret".into(),
            &server.uri(),
            reqwest::Client::new(),
        );
        TokenManager::new(
            Arc::new(provider),
            store,
            StateSigner::new("lifecycle-test-secret").unwrap(),
            "https://connector.example.org/auth/callback".into(),
            vec!["people".into(), "services".into()],
        )
    }

    fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> serde_json::Value {
        serde_json::json!({
            "access_token": access,
            "refresh_token": refresh,
            "token_type": "bearer",
            "expires_in": expires_in,
        })
    }

    fn expired_pair(refresh: Option<&str>) -> CredentialPair {
        CredentialPair {
            access_token: "old-access".into(),
            refresh_token: refresh.map(String::from),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            token_type: "bearer".into(),
            scope: None,
            obtained_at: Utc::now() - Duration::hours(2),
        }
    }

    #[tokio::test]
    async fn test_begin_authorization_is_pending_with_signed_state() {
        let server = MockServer::start().await;
        let tm = manager(&server, Arc::new(MemoryCredentialStore::new()));

        let req = tm.begin_authorization().await.unwrap();
        assert_eq!(req.connection_state, ConnectionState::AuthorizationPending);
        assert!(req.url.contains("/oauth/authorize?"));
        tm.signer.check_state(&req.state).unwrap();
    }

    #[tokio::test]
    async fn test_complete_then_ensure_valid_skips_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", Some("rt-1"), 7200)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("never", None, 7200)))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let tm = manager(&server, store.clone());
        let req = tm.begin_authorization().await.unwrap();

        tm.complete_authorization("code-123", &req.state).await.unwrap();
        assert_eq!(tm.ensure_valid().await.unwrap(), "at-1");
        assert_eq!(tm.status().await.unwrap().state, ConnectionState::Authenticated);
    }

    #[tokio::test]
    async fn test_expired_pair_refreshes_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-new", Some("rt-new"), 7200)))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        store.put(&expired_pair(Some("rt-old"))).await.unwrap();
        let tm = manager(&server, store.clone());

        assert_eq!(tm.ensure_valid().await.unwrap(), "at-new");
        // Second call sees the fresh pair and does not refresh again.
        assert_eq!(tm.ensure_valid().await.unwrap(), "at-new");

        let stored = store.get().await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("rt-new"));
        assert!(stored.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_refresh_without_new_refresh_token_keeps_old_one() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-new", None, 3600)))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        store.put(&expired_pair(Some("rt-keep"))).await.unwrap();
        let tm = manager(&server, store.clone());

        tm.ensure_valid().await.unwrap();
        let stored = store.get().await.unwrap().unwrap();
        assert_eq!(stored.access_token, "at-new");
        assert_eq!(stored.refresh_token.as_deref(), Some("rt-keep"));
    }

    #[tokio::test]
    async fn test_revoked_refresh_clears_and_requires_reauthorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        store.put(&expired_pair(Some("rt-revoked"))).await.unwrap();
        let tm = manager(&server, store.clone());

        let err = tm.ensure_valid().await.unwrap_err();
        assert!(matches!(err, ConnectorError::ReauthorizationRequired));
        assert!(store.get().await.unwrap().is_none());
        assert_eq!(tm.status().await.unwrap().state, ConnectionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_refresh_outage_keeps_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        store.put(&expired_pair(Some("rt"))).await.unwrap();
        let tm = manager(&server, store.clone());

        let err = tm.ensure_valid().await.unwrap_err();
        assert!(matches!(err, ConnectorError::UpstreamUnavailable(_)));
        assert_eq!(tm.status().await.unwrap().state, ConnectionState::Expired);
    }

    #[tokio::test]
    async fn test_failed_exchange_returns_to_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        store.put(&expired_pair(Some("rt"))).await.unwrap();
        let tm = manager(&server, store.clone());
        let req = tm.begin_authorization().await.unwrap();

        let err = tm.complete_authorization("bad", &req.state).await.unwrap_err();
        assert!(matches!(err, ConnectorError::AuthExchangeFailed(_)));
        assert_eq!(tm.status().await.unwrap().state, ConnectionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_forged_state_never_reaches_token_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let tm = manager(&server, Arc::new(MemoryCredentialStore::new()));
        let err = tm.complete_authorization("code", "forged").await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_missing_pair_requires_reauthorization() {
        let server = MockServer::start().await;
        let tm = manager(&server, Arc::new(MemoryCredentialStore::new()));
        assert!(matches!(
            tm.ensure_valid().await.unwrap_err(),
            ConnectorError::ReauthorizationRequired
        ));
    }

    #[tokio::test]
    async fn test_status_tracks_expiry_and_disconnect() {
        let server = MockServer::start().await;
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let tm = manager(&server, store.clone());

        assert_eq!(tm.status().await.unwrap().state, ConnectionState::Unauthenticated);

        store.put(&expired_pair(Some("rt-1"))).await.unwrap();
        assert_eq!(tm.status().await.unwrap().state, ConnectionState::Expired);

        tm.disconnect().await.unwrap();
        assert_eq!(tm.status().await.unwrap().state, ConnectionState::Unauthenticated);
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_cannot_be_redeemed_twice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", Some("rt-1"), 7200)))
            .expect(1)
            .mount(&server)
            .await;

        let tm = manager(&server, Arc::new(MemoryCredentialStore::new()));
        let req = tm.begin_authorization().await.unwrap();

        tm.complete_authorization("code-1", &req.state).await.unwrap();
        let err = tm.complete_authorization("code-2", &req.state).await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_newer_connect_supersedes_older_state() {
        let server = MockServer::start().await;
        let tm = manager(&server, Arc::new(MemoryCredentialStore::new()));

        let older = tm.begin_authorization().await.unwrap();
        let _newer = tm.begin_authorization().await.unwrap();

        let err = tm.complete_authorization("code", &older.state).await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_denied_consent_needs_a_valid_state_to_clear() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryCredentialStore::new());
        store.put(&expired_pair(Some("rt"))).await.unwrap();
        let tm = manager(&server, store.clone());

        let err = tm.reject_authorization("forged", "access_denied".into()).await;
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));
        assert!(store.get().await.unwrap().is_some());

        let req = tm.begin_authorization().await.unwrap();
        let err = tm.reject_authorization(&req.state, "access_denied".into()).await;
        assert!(matches!(err, ConnectorError::AuthExchangeFailed(_)));
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_with_rotated_token_keeps_pair() {
        let server = MockServer::start().await;
        // First refresh wins and rotates the token; the loser is rejected later.
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-new", Some("rt-new"), 7200)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error":"invalid_grant"}"#)
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        store.put(&expired_pair(Some("rt-old"))).await.unwrap();
        let tm = manager(&server, store.clone());

        let (a, b) = tokio::join!(tm.ensure_valid(), tm.ensure_valid());
        assert_eq!(a.unwrap(), "at-new");
        assert_eq!(b.unwrap(), "at-new");

        let stored = store.get().await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("rt-new"));
    }

    #[tokio::test]
    async fn test_access_token_reports_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-new", Some("rt-new"), 7200)))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        store.put(&expired_pair(Some("rt-old"))).await.unwrap();
        let tm = manager(&server, store);

        assert!(tm.access_token().await.unwrap().refreshed);
        assert!(!tm.access_token().await.unwrap().refreshed);
    }
}
