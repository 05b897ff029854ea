//! API route handlers.
//!
//! All handlers receive `SharedState` via Axum state extraction and return
//! `ConnectorError` on failure, which renders the JSON error body. Query
//! extraction failures are mapped to `InvalidRequest` by taking
//! `Result<Query<T>, QueryRejection>`.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::ServiceTypeSelector;
use crate::error::ConnectorError;
use crate::upstream::PlansQuery;
use crate::SharedState;

const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_PEOPLE_PAGE_SIZE: u32 = 5;
const DEFAULT_PLANS_PAGE_SIZE: u32 = 10;

pub fn router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/health", get(health))
        // ── People ───────────────────────────────────────────────────────
        .route("/people/find", get(people_find))
        // ── Services ─────────────────────────────────────────────────────
        .route("/services/service-types", get(service_types))
        .route("/services/service-types/resolve", get(service_type_resolve))
        .route("/services/plans", get(services_plans))
        .route("/services/plan", get(services_plan))
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/connect", get(connect))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/status", get(auth_status))
        .route("/auth/disconnect", post(auth_disconnect))
        // ── API description ──────────────────────────────────────────────
        .route("/openapi.json", get(openapi))
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

/// GET /health: always 200; store problems show up as `store_connected: false`.
async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let store_connected = state.store.ping().await;

    Json(json!({
        "ok": true,
        "store_connected": store_connected,
        "store": state.store.kind(),
        "degraded": state.store.is_degraded(),
        "auth_mode": state.config.auth.mode(),
        "service": "pco-connector",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// People
// =============================================================================

#[derive(Deserialize)]
struct FindPeopleQuery {
    name: String,
    page_size: Option<u32>,
}

/// GET /people/find: Search people by full or partial name.
async fn people_find(
    State(state): State<SharedState>,
    query: Result<Query<FindPeopleQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ConnectorError> {
    let Query(q) = query?;
    let name = required("name", &q.name)?;
    let page_size = page_size(q.page_size, DEFAULT_PEOPLE_PAGE_SIZE)?;

    let people = state.upstream.find_people(name, page_size).await?;

    Ok(Json(json!({ "count": people.len(), "people": people })))
}

// =============================================================================
// Services
// =============================================================================

/// GET /services/service-types: List service types.
async fn service_types(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, ConnectorError> {
    let types = state.resolver.list().await?;
    Ok(Json(json!({ "count": types.len(), "service_types": types })))
}

#[derive(Deserialize)]
struct ResolveQuery {
    query: String,
}

/// GET /services/service-types/resolve: Free-text name to service type id.
async fn service_type_resolve(
    State(state): State<SharedState>,
    query: Result<Query<ResolveQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ConnectorError> {
    let Query(q) = query?;
    let found = state.resolver.resolve(&q.query).await?;
    Ok(Json(json!({ "id": found.id, "name": found.name })))
}

#[derive(Deserialize)]
struct PlansParams {
    service_type_id: Option<String>,
    service_type_name: Option<String>,
    page_size: Option<u32>,
    from_date: Option<String>,
    to_date: Option<String>,
}

/// GET /services/plans: Plans for a service type given by id or by name.
///
/// Falls back to the configured default service type when neither is given.
async fn services_plans(
    State(state): State<SharedState>,
    query: Result<Query<PlansParams>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ConnectorError> {
    let Query(q) = query?;

    let selector = non_blank(q.service_type_id)
        .map(ServiceTypeSelector::Id)
        .or_else(|| non_blank(q.service_type_name).map(ServiceTypeSelector::Name))
        .or_else(|| state.config.default_service_type.clone())
        .ok_or_else(|| {
            ConnectorError::InvalidRequest(
                "service_type_id or service_type_name is required".into(),
            )
        })?;

    let service_type_id = match selector {
        ServiceTypeSelector::Id(id) => id,
        ServiceTypeSelector::Name(name) => state.resolver.resolve(&name).await?.id,
    };

    let plans_query = PlansQuery {
        page_size: page_size(q.page_size, DEFAULT_PLANS_PAGE_SIZE)?,
        from_date: date_param("from_date", q.from_date)?,
        to_date: date_param("to_date", q.to_date)?,
    };

    if let (Some(from), Some(to)) = (plans_query.from_date, plans_query.to_date) {
        if from > to {
            return Err(ConnectorError::InvalidRequest(
                "from_date must not be after to_date".into(),
            ));
        }
    }

    let plans = state
        .upstream
        .service_plans(&service_type_id, &plans_query)
        .await?;

    Ok(Json(json!({
        "count": plans.len(),
        "service_type_id": service_type_id,
        "plans": plans,
    })))
}

#[derive(Deserialize)]
struct PlanQuery {
    plan_id: String,
}

/// GET /services/plan: One plan with times and needed positions.
async fn services_plan(
    State(state): State<SharedState>,
    query: Result<Query<PlanQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ConnectorError> {
    let Query(q) = query?;
    let plan = state.upstream.plan(required("plan_id", &q.plan_id)?).await?;
    Ok(Json(json!(plan)))
}

// =============================================================================
// OAuth
// =============================================================================

/// GET /connect: Redirect to the Planning Center consent screen.
async fn connect(State(state): State<SharedState>) -> Result<Response, ConnectorError> {
    let tokens = oauth_only(&state)?;
    let request = tokens.begin_authorization().await?;

    Ok((StatusCode::FOUND, [(header::LOCATION, request.url)]).into_response())
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /auth/callback: Exchange the authorization code and store the tokens.
///
/// Every outcome, including a denied consent, requires the signed state.
async fn auth_callback(
    State(state): State<SharedState>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ConnectorError> {
    let tokens = oauth_only(&state)?;
    let Query(q) = query?;

    let oauth_state = non_blank(q.state)
        .ok_or_else(|| ConnectorError::InvalidRequest("missing state".into()))?;

    if let Some(error) = q.error {
        let reason = match q.error_description {
            Some(desc) => format!("{error}: {desc}"),
            None => error,
        };
        return Err(tokens.reject_authorization(&oauth_state, reason).await);
    }

    let code = q
        .code
        .ok_or_else(|| ConnectorError::InvalidRequest("missing code".into()))?;

    let pair = tokens.complete_authorization(&code, &oauth_state).await?;
    info!("Planning Center connected via OAuth callback");

    Ok(Json(json!({
        "connected": true,
        "expires_at": pair.expires_at,
        "scope": pair.scope,
    })))
}

/// GET /auth/status: Current connection state.
async fn auth_status(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, ConnectorError> {
    let Some(tokens) = &state.tokens else {
        return Ok(Json(json!({ "mode": "static", "state": "authenticated" })));
    };

    let status = tokens.status().await?;
    Ok(Json(json!({
        "mode": "oauth",
        "state": status.state,
        "expires_at": status.expires_at,
        "scope": status.scope,
    })))
}

/// POST /auth/disconnect: Forget the stored tokens.
async fn auth_disconnect(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, ConnectorError> {
    oauth_only(&state)?.disconnect().await?;
    Ok(Json(json!({ "disconnected": true })))
}

// =============================================================================
// API description
// =============================================================================

/// GET /openapi.json: OpenAPI document with an https-only server entry.
async fn openapi(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    let server_url = super::openapi::server_url(state.config.public_base_url.as_deref(), &headers);
    Json(super::openapi::document(&server_url))
}

// =============================================================================
// Helpers
// =============================================================================

fn oauth_only(state: &SharedState) -> Result<&std::sync::Arc<crate::auth::TokenManager>, ConnectorError> {
    state.tokens.as_ref().ok_or_else(|| {
        ConnectorError::NotConfigured("OAuth is not enabled; the connector uses static credentials".into())
    })
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, ConnectorError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConnectorError::InvalidRequest(format!("{field} must not be empty")));
    }
    Ok(value)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn page_size(requested: Option<u32>, default: u32) -> Result<u32, ConnectorError> {
    match requested {
        None => Ok(default),
        Some(n) if (1..=MAX_PAGE_SIZE).contains(&n) => Ok(n),
        Some(n) => Err(ConnectorError::InvalidRequest(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}, got {n}"
        ))),
    }
}

fn date_param(field: &str, value: Option<String>) -> Result<Option<NaiveDate>, ConnectorError> {
    non_blank(value)
        .map(|v| {
            NaiveDate::parse_from_str(&v, "%Y-%m-%d").map_err(|_| {
                ConnectorError::InvalidRequest(format!("{field} must be YYYY-MM-DD, got '{v}'"))
            })
        })
        .transpose()
}
