use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the connector.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    // ── OAuth Errors ────────────────────────────────────────────────────
    #[error("Authorization code exchange failed: {0}")]
    AuthExchangeFailed(String),

    #[error("Planning Center authorization is missing or revoked; reconnect via /connect")]
    ReauthorizationRequired,

    #[error("Planning Center rejected the credentials: {0}")]
    AuthRejected(String),

    // ── Store Errors ────────────────────────────────────────────────────
    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(String),

    // ── Resource Errors ─────────────────────────────────────────────────
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    // ── Upstream Errors ─────────────────────────────────────────────────
    #[error("Planning Center unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Planning Center returned HTTP {status}")]
    UpstreamError { status: u16, body: String },

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConnectorError {
    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ConnectorError::AuthExchangeFailed(_) => {
                (StatusCode::UNAUTHORIZED, "auth_exchange_failed")
            }
            ConnectorError::ReauthorizationRequired => {
                (StatusCode::UNAUTHORIZED, "reauthorization_required")
            }
            ConnectorError::AuthRejected(_) => (StatusCode::UNAUTHORIZED, "auth_rejected"),
            ConnectorError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            ConnectorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ConnectorError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ConnectorError::NotConfigured(_) => (StatusCode::NOT_FOUND, "not_configured"),
            ConnectorError::UpstreamUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_unavailable")
            }
            ConnectorError::UpstreamError { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            ConnectorError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<sqlx::Error> for ConnectorError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Credential store error: {e}");
        ConnectorError::StoreUnavailable(e.to_string())
    }
}

impl From<anyhow::Error> for ConnectorError {
    fn from(e: anyhow::Error) -> Self {
        ConnectorError::Internal(e.to_string())
    }
}

impl From<axum::extract::rejection::QueryRejection> for ConnectorError {
    fn from(e: axum::extract::rejection::QueryRejection) -> Self {
        ConnectorError::InvalidRequest(e.body_text())
    }
}

impl IntoResponse for ConnectorError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let mut error = json!({
            "code": code,
            "message": self.to_string(),
        });

        match &self {
            ConnectorError::UpstreamError { status, body } => {
                error["upstream_status"] = json!(status);
                error["detail"] = json!(body);
            }
            ConnectorError::ReauthorizationRequired => {
                error["connect_url"] = json!("/connect");
            }
            _ => {}
        }

        (status, axum::Json(json!({ "error": error }))).into_response()
    }
}
