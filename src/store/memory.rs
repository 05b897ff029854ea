//! In-process credential store.
//!
//! Degraded mode only: tokens are lost on restart and are not shared between
//! replicas. Selected when `DATABASE_URL` is unset.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CredentialPair, CredentialStore};
use crate::error::ConnectorError;

#[derive(Default)]
pub struct MemoryCredentialStore {
    pair: RwLock<Option<CredentialPair>>,
    pending_state: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self) -> Result<Option<CredentialPair>, ConnectorError> {
        Ok(self.pair.read().await.clone())
    }

    async fn put(&self, pair: &CredentialPair) -> Result<(), ConnectorError> {
        *self.pair.write().await = Some(pair.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), ConnectorError> {
        *self.pair.write().await = None;
        Ok(())
    }

    async fn clear_if_refresh_token(&self, refresh_token: &str) -> Result<bool, ConnectorError> {
        let mut pair = self.pair.write().await;
        let matches = pair
            .as_ref()
            .is_some_and(|p| p.refresh_token.as_deref() == Some(refresh_token));
        if matches {
            *pair = None;
        }
        Ok(matches)
    }

    async fn put_pending_state(&self, nonce: &str) -> Result<(), ConnectorError> {
        *self.pending_state.write().await = Some(nonce.to_string());
        Ok(())
    }

    async fn take_pending_state(&self, nonce: &str) -> Result<bool, ConnectorError> {
        let mut pending = self.pending_state.write().await;
        if pending.as_deref() == Some(nonce) {
            *pending = None;
            return Ok(true);
        }
        Ok(false)
    }

    /// There is no external store to reach.
    async fn ping(&self) -> bool {
        false
    }

    fn kind(&self) -> &'static str {
        "memory"
    }

    fn is_degraded(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pair(token: &str) -> CredentialPair {
        CredentialPair {
            access_token: token.into(),
            refresh_token: Some(format!("{token}-refresh")),
            expires_at: Some(Utc::now()),
            token_type: "Bearer".into(),
            scope: None,
            obtained_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_replaces_previous_pair() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().await.unwrap().is_none());

        store.put(&pair("first")).await.unwrap();
        store.put(&pair("second")).await.unwrap();

        let got = store.get().await.unwrap().unwrap();
        assert_eq!(got.access_token, "second");
        assert_eq!(got.refresh_token.as_deref(), Some("second-refresh"));
    }

    #[tokio::test]
    async fn test_clear_and_degraded_flags() {
        let store = MemoryCredentialStore::new();
        store.put(&pair("t")).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.get().await.unwrap().is_none());
        assert!(store.is_degraded());
        assert!(!store.ping().await);
        assert_eq!(store.kind(), "memory");
    }

    #[tokio::test]
    async fn test_clear_if_refresh_token_only_clears_matching_pair() {
        let store = MemoryCredentialStore::new();
        store.put(&pair("rotated")).await.unwrap();

        assert!(!store.clear_if_refresh_token("stale-refresh").await.unwrap());
        assert!(store.get().await.unwrap().is_some());

        assert!(store.clear_if_refresh_token("rotated-refresh").await.unwrap());
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_state_is_single_use_and_superseded() {
        let store = MemoryCredentialStore::new();
        store.put_pending_state("first").await.unwrap();
        store.put_pending_state("second").await.unwrap();

        assert!(!store.take_pending_state("first").await.unwrap());
        assert!(store.take_pending_state("second").await.unwrap());
        assert!(!store.take_pending_state("second").await.unwrap());
    }
}
