//! Free-text service type name → upstream id.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::client::UpstreamClient;
use super::shape::Document;
use crate::error::ConnectorError;

const SERVICE_TYPES_PATH: &str = "/services/v2/service_types";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceType {
    pub id: String,
    pub name: String,
}

/// Pick the service type matching `query`.
///
/// Case-insensitive exact name match first, then the first case-insensitive
/// substring match in upstream order. Several substring matches are not
/// disambiguated further.
pub fn match_service_type<'a>(types: &'a [ServiceType], query: &str) -> Option<&'a ServiceType> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    types
        .iter()
        .find(|t| t.name.to_lowercase() == needle)
        .or_else(|| types.iter().find(|t| t.name.to_lowercase().contains(&needle)))
}

pub struct ServiceTypeResolver {
    client: Arc<UpstreamClient>,
}

impl ServiceTypeResolver {
    pub fn new(client: Arc<UpstreamClient>) -> Self {
        Self { client }
    }

    /// Fetch the service types (first page only; lists are small in practice).
    pub async fn list(&self) -> Result<Vec<ServiceType>, ConnectorError> {
        let body = self
            .client
            .get(SERVICE_TYPES_PATH, &[("per_page", "100".to_string())])
            .await?;
        let doc = Document::parse(body)?;

        Ok(doc
            .primary()
            .iter()
            .map(|r| ServiceType {
                id: r.id.clone(),
                name: r.str_attr("name").unwrap_or_default(),
            })
            .collect())
    }

    pub async fn resolve(&self, query: &str) -> Result<ServiceType, ConnectorError> {
        if query.trim().is_empty() {
            return Err(ConnectorError::InvalidRequest("query must not be empty".into()));
        }

        let types = self.list().await?;
        let found = match_service_type(&types, query)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound(format!("Service type matching '{}'", query.trim())))?;

        debug!("Resolved service type '{}' to {} ({})", query, found.id, found.name);
        Ok(found)
    }
}
