//! Credential store for the OAuth token pair.
//!
//! The network backend is a PostgreSQL key-value table. The memory backend
//! exists only as an explicitly degraded fallback when no database is
//! configured; `/health` reports it as such.

pub mod db;
pub mod memory;

pub use db::PgCredentialStore;
pub use memory::MemoryCredentialStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// The access/refresh token pair. Always written as one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// `None` means the token does not expire.
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    pub obtained_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl CredentialPair {
    /// True when the access token has expired, or will within `skew`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now + skew)
    }
}

/// Persistence contract for the credential pair.
///
/// `put` must replace the previous pair in a single operation so readers never
/// observe a pair whose `expires_at` belongs to a different token.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self) -> Result<Option<CredentialPair>, ConnectorError>;

    async fn put(&self, pair: &CredentialPair) -> Result<(), ConnectorError>;

    async fn clear(&self) -> Result<(), ConnectorError>;

    /// Clear the pair only while it still carries `refresh_token`. Returns
    /// whether anything was removed.
    async fn clear_if_refresh_token(&self, refresh_token: &str) -> Result<bool, ConnectorError>;

    /// Record the nonce of the one pending authorization, replacing any older one.
    async fn put_pending_state(&self, nonce: &str) -> Result<(), ConnectorError>;

    /// Consume the pending nonce if it equals `nonce`. Returns false for an
    /// unknown, superseded or already used nonce.
    async fn take_pending_state(&self, nonce: &str) -> Result<bool, ConnectorError>;

    /// Reachability check for the health endpoint.
    async fn ping(&self) -> bool;

    /// Backend name reported by `/health`.
    fn kind(&self) -> &'static str;

    /// Whether this backend is the in-process fallback.
    fn is_degraded(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(expires_at: Option<DateTime<Utc>>) -> CredentialPair {
        CredentialPair {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at,
            token_type: "Bearer".into(),
            scope: None,
            obtained_at: Utc::now(),
        }
    }

    #[test]
    fn test_expiry_honours_skew() {
        let now = Utc::now();
        let p = pair(Some(now + Duration::seconds(20)));
        assert!(!p.is_expired_at(now, Duration::zero()));
        assert!(p.is_expired_at(now, Duration::seconds(30)));
    }

    #[test]
    fn test_pair_without_expiry_never_expires() {
        let p = pair(None);
        assert!(!p.is_expired_at(Utc::now() + Duration::days(3650), Duration::seconds(30)));
    }

    #[test]
    fn test_missing_token_type_defaults_to_bearer() {
        let json = serde_json::json!({
            "access_token": "at",
            "refresh_token": null,
            "expires_at": null,
            "obtained_at": "2025-01-01T00:00:00Z",
        });
        let p: CredentialPair = serde_json::from_value(json).unwrap();
        assert_eq!(p.token_type, "Bearer");
    }
}
