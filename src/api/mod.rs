//! HTTP surface of the connector.
//!
//! - /health: liveness plus credential store status
//! - /people/find: people search
//! - /services/...: service types, resolver, plans
//! - /connect, /auth/...: OAuth flow and connection status
//! - /openapi.json: API description for agent auto-configuration

pub mod openapi;
pub mod routes;

use crate::SharedState;
use axum::http::{HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}
