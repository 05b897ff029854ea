use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use pco_connector::store::{CredentialStore, MemoryCredentialStore, PgCredentialStore};
use pco_connector::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pco_connector=info,tower_http=info".into()),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    info!("pco-connector v{}", env!("CARGO_PKG_VERSION"));
    info!("Upstream auth mode: {}", config.auth.mode());

    // Credential store
    let store: Arc<dyn CredentialStore> = match &config.database_url {
        Some(url) => {
            let pg = PgCredentialStore::connect_lazy(url)?;
            match pg.migrate().await {
                Ok(()) => info!("Credential store connected ✓"),
                Err(e) => warn!("Credential store unreachable at startup: {e}. Will retry on use."),
            }
            Arc::new(pg)
        }
        None => {
            warn!(
                "DATABASE_URL not set: running with the in-memory credential store (degraded). \
                 OAuth tokens will not survive a restart."
            );
            Arc::new(MemoryCredentialStore::new())
        }
    };

    let state: SharedState = Arc::new(AppState::new(config.clone(), store)?);

    // Build router
    let app = api::router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
