use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// A set of tokens returned from the token endpoint after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "bearer")]
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

fn bearer() -> String {
    "Bearer".into()
}

/// The OAuth endpoints of the upstream service.
///
/// Error contract:
/// - `exchange_code`: a rejected code is `AuthExchangeFailed`.
/// - `refresh_token`: a rejected refresh token is `ReauthorizationRequired`.
/// - Either: transport failures, 429 and 5xx are `UpstreamUnavailable`.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Provider identifier used in logs.
    fn id(&self) -> &str;

    /// Build the authorization URL that the user should be redirected to.
    ///
    /// - `scopes`: The OAuth scopes to request.
    /// - `state`: An opaque, HMAC-signed state string for CSRF protection.
    /// - `redirect_uri`: The callback URL registered with the provider.
    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> String;

    /// Exchange an authorization code for an access token and refresh token.
    async fn exchange_code(&self, code: &str, redirect_uri: &str)
        -> Result<TokenSet, ConnectorError>;

    /// Obtain a new access token using a refresh token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ConnectorError>;
}
