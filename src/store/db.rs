//! PostgreSQL-backed credential store.
//!
//! Uses a single key-value table:
//! - `connector_kv`: one JSONB value per key; the OAuth pair lives under
//!   [`CREDENTIAL_KEY`], the pending authorization nonce under
//!   [`PENDING_STATE_KEY`].

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{CredentialPair, CredentialStore};
use crate::error::ConnectorError;

/// Key under which the OAuth credential pair is stored.
pub const CREDENTIAL_KEY: &str = "pco:oauth:credentials";

/// Key under which the nonce of the pending authorization is stored.
pub const PENDING_STATE_KEY: &str = "pco:oauth:pending_state";

/// Credential store backed by PostgreSQL.
pub struct PgCredentialStore {
    pool: PgPool,
    schema_ready: AtomicBool,
}

impl PgCredentialStore {
    /// Build a lazily-connecting pool. Never fails on an unreachable database;
    /// operations report `StoreUnavailable` instead.
    pub fn connect_lazy(db_url: &str) -> Result<Self, ConnectorError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect_lazy(db_url)
            .map_err(|e| ConnectorError::StoreUnavailable(format!("Invalid DATABASE_URL: {e}")))?;

        Ok(Self {
            pool,
            schema_ready: AtomicBool::new(false),
        })
    }

    /// Create the key-value table if needed. Safe to call repeatedly.
    pub async fn migrate(&self) -> Result<(), ConnectorError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connector_kv (
                key         TEXT PRIMARY KEY,
                value       JSONB NOT NULL,
                updated_at  TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        self.schema_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<(), ConnectorError> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.migrate().await
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn get(&self) -> Result<Option<CredentialPair>, ConnectorError> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT value FROM connector_kv WHERE key = $1")
            .bind(CREDENTIAL_KEY)
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let value: Json<serde_json::Value> = row.try_get(0)?;
        match serde_json::from_value(value.0) {
            Ok(pair) => Ok(Some(pair)),
            Err(e) => {
                // An unreadable value is treated as absent so /connect can overwrite it.
                tracing::warn!("Discarding unreadable credential pair: {e}");
                Ok(None)
            }
        }
    }

    async fn put(&self, pair: &CredentialPair) -> Result<(), ConnectorError> {
        self.ensure_schema().await?;

        let value = serde_json::to_value(pair)
            .map_err(|e| ConnectorError::Internal(format!("Serialize credentials: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO connector_kv (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(CREDENTIAL_KEY)
        .bind(Json(value))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), ConnectorError> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM connector_kv WHERE key = $1")
            .bind(CREDENTIAL_KEY)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn clear_if_refresh_token(&self, refresh_token: &str) -> Result<bool, ConnectorError> {
        self.ensure_schema().await?;

        let result = sqlx::query(
            "DELETE FROM connector_kv WHERE key = $1 AND value->>'refresh_token' = $2",
        )
        .bind(CREDENTIAL_KEY)
        .bind(refresh_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn put_pending_state(&self, nonce: &str) -> Result<(), ConnectorError> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO connector_kv (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(PENDING_STATE_KEY)
        .bind(Json(nonce))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take_pending_state(&self, nonce: &str) -> Result<bool, ConnectorError> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM connector_kv WHERE key = $1 AND value = $2")
            .bind(PENDING_STATE_KEY)
            .bind(Json(nonce))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}
