use anyhow::{bail, Context, Result};

const DEFAULT_API_BASE: &str = "https://api.planningcenteronline.com";
const DEFAULT_SCOPES: &str = "people services";

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    /// Externally visible base URL, used for the OpenAPI `servers` entry
    /// and the default OAuth redirect URI.
    pub public_base_url: Option<String>,
    /// Allowed CORS origins. `*` allows any.
    pub cors_origins: Vec<String>,

    // ── Credential store ────────────────────────────────────────────────
    /// PostgreSQL connection string. Unset selects the degraded in-memory store.
    pub database_url: Option<String>,

    // ── Upstream ────────────────────────────────────────────────────────
    pub api_base: String,
    pub upstream_timeout_secs: u64,
    pub auth: UpstreamAuth,

    // ── Defaults ────────────────────────────────────────────────────────
    pub default_service_type: Option<ServiceTypeSelector>,
}

/// How requests to Planning Center are authenticated.
#[derive(Debug, Clone)]
pub enum UpstreamAuth {
    /// Personal access token pair sent as Basic Auth.
    Static { app_id: String, secret: String },
    /// Bearer token obtained through the authorization-code flow.
    OAuth(OAuthSettings),
}

impl UpstreamAuth {
    pub fn mode(&self) -> &'static str {
        match self {
            UpstreamAuth::Static { .. } => "static",
            UpstreamAuth::OAuth(_) => "oauth",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Secret for signing the OAuth `state` parameter.
    pub session_secret: String,
}

/// Service type used by the plans lookup when the caller names none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceTypeSelector {
    Id(String),
    Name(String),
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let public_base_url = var("PUBLIC_BASE_URL").map(|u| u.trim_end_matches('/').to_string());

        let auth = match var("AUTH_MODE").as_deref() {
            Some("static") => static_auth(&var)?,
            Some("oauth") => oauth_auth(&var, public_base_url.as_deref())?,
            Some(other) => bail!("Invalid AUTH_MODE '{other}' (expected 'static' or 'oauth')"),
            None if var("PCO_CLIENT_ID").is_some() => {
                oauth_auth(&var, public_base_url.as_deref())?
            }
            None if var("PCO_APP_ID").is_some() => static_auth(&var)?,
            None => bail!(
                "No Planning Center credentials: set PCO_APP_ID/PCO_SECRET or \
                 PCO_CLIENT_ID/PCO_CLIENT_SECRET"
            ),
        };

        let default_service_type = var("DEFAULT_SERVICE_TYPE_ID")
            .map(ServiceTypeSelector::Id)
            .or_else(|| var("DEFAULT_SERVICE_TYPE_NAME").map(ServiceTypeSelector::Name));

        Ok(Config {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: var("PORT")
                .unwrap_or_else(|| "8080".into())
                .parse()
                .context("Invalid PORT")?,
            public_base_url,
            cors_origins: var("CORS_ORIGINS")
                .unwrap_or_else(|| "*".into())
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),

            database_url: var("DATABASE_URL"),

            api_base: var("PCO_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.into())
                .trim_end_matches('/')
                .to_string(),
            upstream_timeout_secs: var("UPSTREAM_TIMEOUT_SECS")
                .unwrap_or_else(|| "10".into())
                .parse()
                .context("Invalid UPSTREAM_TIMEOUT_SECS")?,
            auth,

            default_service_type,
        })
    }
}

fn static_auth(var: &impl Fn(&str) -> Option<String>) -> Result<UpstreamAuth> {
    Ok(UpstreamAuth::Static {
        app_id: var("PCO_APP_ID").context("PCO_APP_ID is required in static mode")?,
        secret: var("PCO_SECRET").context("PCO_SECRET is required in static mode")?,
    })
}

fn oauth_auth(
    var: &impl Fn(&str) -> Option<String>,
    public_base_url: Option<&str>,
) -> Result<UpstreamAuth> {
    let redirect_uri = var("PCO_REDIRECT_URI")
        .or_else(|| public_base_url.map(|base| format!("{base}/auth/callback")))
        .context("PCO_REDIRECT_URI or PUBLIC_BASE_URL is required in OAuth mode")?;

    Ok(UpstreamAuth::OAuth(OAuthSettings {
        client_id: var("PCO_CLIENT_ID").context("PCO_CLIENT_ID is required in OAuth mode")?,
        client_secret: var("PCO_CLIENT_SECRET")
            .context("PCO_CLIENT_SECRET is required in OAuth mode")?,
        redirect_uri,
        scopes: var("PCO_SCOPES")
            .unwrap_or_else(|| DEFAULT_SCOPES.into())
            .split([' ', ','])
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        session_secret: var("SESSION_SECRET")
            .context("SESSION_SECRET is required in OAuth mode (signs the OAuth state)")?,
    }))
}
