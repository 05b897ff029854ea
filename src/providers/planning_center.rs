use async_trait::async_trait;
use reqwest::StatusCode;

use super::traits::{OAuthProvider, TokenSet};
use crate::error::ConnectorError;

/// Planning Center OAuth 2.0 provider.
///
/// Quirks:
/// - Authorization and token endpoints live on the API host under `/oauth`.
/// - Access tokens last two hours; refresh tokens rotate on every refresh.
/// - Scopes are space-separated product names (`people`, `services`, ...).
pub struct PlanningCenterProvider {
    client_id: String,
    client_secret: String,
    authorize_url: String,
    token_url: String,
    http: reqwest::Client,
}

impl PlanningCenterProvider {
    /// `api_base` is the Planning Center host, e.g. `https://api.planningcenteronline.com`.
    pub fn new(
        client_id: String,
        client_secret: String,
        api_base: &str,
        http: reqwest::Client,
    ) -> Self {
        let base = api_base.trim_end_matches('/');
        Self {
            client_id,
            client_secret,
            authorize_url: format!("{base}/oauth/authorize"),
            token_url: format!("{base}/oauth/token"),
            http,
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenRequestOutcome, ConnectorError> {
        let resp = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| ConnectorError::UpstreamUnavailable(format!("Token request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ConnectorError::UpstreamUnavailable(format!(
                "Token endpoint returned {status}"
            )));
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Ok(TokenRequestOutcome::Rejected(body));
        }

        let tokens: TokenSet = resp.json().await.map_err(|e| ConnectorError::UpstreamError {
            status: status.as_u16(),
            body: format!("Failed to parse token response: {e}"),
        })?;

        Ok(TokenRequestOutcome::Issued(tokens))
    }
}

enum TokenRequestOutcome {
    Issued(TokenSet),
    Rejected(String),
}

#[async_trait]
impl OAuthProvider for PlanningCenterProvider {
    fn id(&self) -> &str {
        "planning_center"
    }

    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> String {
        let scope_str = scopes.join(" ");
        format!(
            "{authorize_url}?\
             client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &response_type=code\
             &scope={scope}\
             &state={state}",
            authorize_url = self.authorize_url,
            client_id = urlencoding(&self.client_id),
            redirect_uri = urlencoding(redirect_uri),
            scope = urlencoding(&scope_str),
            state = urlencoding(state),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ConnectorError> {
        let outcome = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("redirect_uri", redirect_uri),
            ])
            .await?;

        match outcome {
            TokenRequestOutcome::Issued(tokens) => Ok(tokens),
            TokenRequestOutcome::Rejected(body) => Err(ConnectorError::AuthExchangeFailed(body)),
        }
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ConnectorError> {
        let outcome = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .await?;

        match outcome {
            TokenRequestOutcome::Issued(tokens) => Ok(tokens),
            TokenRequestOutcome::Rejected(body) => {
                tracing::warn!("Planning Center rejected the refresh token: {body}");
                Err(ConnectorError::ReauthorizationRequired)
            }
        }
    }
}

/// Simple percent-encoding for URL parameters.
fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
