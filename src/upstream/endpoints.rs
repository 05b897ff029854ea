//! The Planning Center lookups exposed by the connector.

use chrono::{DateTime, Days, NaiveDate};
use tracing::debug;

use super::client::UpstreamClient;
use super::shape::{self, Document, PersonSummary, PlanSummary};
use crate::error::ConnectorError;

const PEOPLE_PATH: &str = "/people/v2/people";
const PLAN_LIST_INCLUDES: &str = "plan_times,needed_positions,team_members";
const PLAN_DETAIL_INCLUDES: &str = "plan_times,needed_positions,team_members,team_members.person";

/// Options for listing a service type's plans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlansQuery {
    pub page_size: u32,
    /// Inclusive lower bound on the plan date.
    pub from_date: Option<NaiveDate>,
    /// Inclusive upper bound on the plan date.
    pub to_date: Option<NaiveDate>,
}

impl UpstreamClient {
    /// People whose name matches `name`, with emails and phone numbers stitched in.
    pub async fn find_people(
        &self,
        name: &str,
        page_size: u32,
    ) -> Result<Vec<PersonSummary>, ConnectorError> {
        let body = self
            .get(
                PEOPLE_PATH,
                &[
                    ("where[name]", name.to_string()),
                    ("include", "emails,phone_numbers".to_string()),
                    ("per_page", page_size.to_string()),
                ],
            )
            .await?;

        let people = shape::people(&Document::parse(body)?);
        debug!("Found {} people matching '{}'", people.len(), name);
        Ok(people)
    }

    /// Plans of one service type.
    ///
    /// Without a date window only upcoming plans are requested. `from_date`
    /// asks upstream for plans after it; `to_date` alone asks for the plans
    /// before it, newest first. Both bounds are then applied locally.
    pub async fn service_plans(
        &self,
        service_type_id: &str,
        query: &PlansQuery,
    ) -> Result<Vec<PlanSummary>, ConnectorError> {
        let id = path_id("service_type_id", service_type_id)?;
        let path = format!("/services/v2/service_types/{id}/plans");

        let mut params = vec![
            ("include", PLAN_LIST_INCLUDES.to_string()),
            ("per_page", query.page_size.to_string()),
        ];
        params.extend(window_params(query.from_date, query.to_date));

        let body = self.get(&path, &params).await?;
        let plans = shape::plans(&Document::parse(body)?);
        Ok(filter_by_date(plans, query.from_date, query.to_date))
    }

    /// One plan by id.
    pub async fn plan(&self, plan_id: &str) -> Result<PlanSummary, ConnectorError> {
        let id = path_id("plan_id", plan_id)?;
        let body = self
            .get(
                &format!("/services/v2/plans/{id}"),
                &[("include", PLAN_DETAIL_INCLUDES.to_string())],
            )
            .await?;

        shape::plans(&Document::parse(body)?)
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::NotFound(format!("Plan {id}")))
    }
}

/// Upstream `filter`/`order` parameters for a date window.
fn window_params(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Vec<(&'static str, String)> {
    let day = |d: NaiveDate| d.format("%Y-%m-%d").to_string();

    match (from, to) {
        (Some(from), _) => vec![
            ("order", "sort_date".to_string()),
            ("filter", "after".to_string()),
            ("after", day(from)),
        ],
        // `before` is exclusive upstream; the local filter keeps `to` itself.
        (None, Some(to)) => vec![
            ("order", "-sort_date".to_string()),
            ("filter", "before".to_string()),
            ("before", day(to.checked_add_days(Days::new(1)).unwrap_or(to))),
        ],
        (None, None) => vec![
            ("order", "sort_date".to_string()),
            ("filter", "future".to_string()),
        ],
    }
}

/// Keep plans whose date falls within `[from, to]`. Plans without a
/// parseable date are kept.
pub fn filter_by_date(
    plans: Vec<PlanSummary>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Vec<PlanSummary> {
    if from.is_none() && to.is_none() {
        return plans;
    }

    plans
        .into_iter()
        .filter(|plan| {
            let Some(date) = plan.dates.as_deref().and_then(plan_date) else {
                return true;
            };
            from.map_or(true, |f| date >= f) && to.map_or(true, |t| date <= t)
        })
        .collect()
}

fn plan_date(raw: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
}

/// Ids are interpolated into upstream paths, so only plain id characters pass.
fn path_id<'a>(field: &str, id: &'a str) -> Result<&'a str, ConnectorError> {
    let id = id.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ConnectorError::InvalidRequest(format!("{field} must be a plain id")));
    }
    Ok(id)
}
