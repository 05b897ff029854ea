pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod providers;
pub mod store;
pub mod upstream;

pub use config::Config;
pub use error::ConnectorError;

use std::sync::Arc;

use auth::TokenManager;
use config::UpstreamAuth;
use crypto::StateSigner;
use providers::PlanningCenterProvider;
use store::CredentialStore;
use upstream::{Credentials, ServiceTypeResolver, UpstreamClient};

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CredentialStore>,
    pub upstream: Arc<UpstreamClient>,
    pub resolver: ServiceTypeResolver,
    /// Present only in OAuth mode.
    pub tokens: Option<Arc<TokenManager>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the upstream client, resolver and (in OAuth mode) the token
    /// lifecycle around an already-chosen credential store.
    pub fn new(config: Config, store: Arc<dyn CredentialStore>) -> Result<Self, ConnectorError> {
        let http = UpstreamClient::http_client(config.upstream_timeout_secs)?;

        let (credentials, tokens) = match &config.auth {
            UpstreamAuth::Static { app_id, secret } => (
                Credentials::Static {
                    app_id: app_id.clone(),
                    secret: secret.clone(),
                },
                None,
            ),
            UpstreamAuth::OAuth(settings) => {
                let provider = PlanningCenterProvider::new(
                    settings.client_id.clone(),
                    settings.client_secret.clone(),
                    &config.api_base,
                    http.clone(),
                );
                let tokens = Arc::new(TokenManager::new(
                    Arc::new(provider),
                    store.clone(),
                    StateSigner::new(&settings.session_secret)?,
                    settings.redirect_uri.clone(),
                    settings.scopes.clone(),
                ));
                (Credentials::OAuth(tokens.clone()), Some(tokens))
            }
        };

        let upstream = Arc::new(UpstreamClient::new(http, &config.api_base, credentials));
        let resolver = ServiceTypeResolver::new(upstream.clone());

        Ok(Self {
            config,
            store,
            upstream,
            resolver,
            tokens,
        })
    }
}
