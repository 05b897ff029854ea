//! Flattening of Planning Center JSON:API documents.
//!
//! Upstream responses carry primary records in `data` and related records in
//! `included`, linked through `relationships.<name>.data` references. The
//! projections below stitch the two together. Omission rules:
//! - a relationship without data yields an empty list;
//! - a reference with no matching included record is skipped;
//! - an email without `address` or a phone without `number` is skipped;
//! - a team member's name falls back to the included `Person` record;
//! - absent scalar attributes are left out of the serialized summary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::ConnectorError;

// =============================================================================
// JSON:API wire types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(t) => std::slice::from_ref(t),
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub data: Option<OneOrMany<Resource>>,
    #[serde(default)]
    pub included: Vec<Resource>,
}

impl Document {
    pub fn parse(body: Value) -> Result<Self, ConnectorError> {
        serde_json::from_value(body).map_err(|e| ConnectorError::UpstreamError {
            status: 200,
            body: format!("Unexpected Planning Center payload: {e}"),
        })
    }

    pub fn primary(&self) -> &[Resource] {
        self.data.as_ref().map(OneOrMany::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub relationships: HashMap<String, Relationship>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Option<OneOrMany<ResourceRef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl Resource {
    pub(crate) fn str_attr(&self, name: &str) -> Option<String> {
        match self.attributes.get(name)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    fn int_attr(&self, name: &str) -> Option<i64> {
        self.attributes.get(name)?.as_i64()
    }

    fn refs(&self, relationship: &str) -> &[ResourceRef] {
        self.relationships
            .get(relationship)
            .and_then(|r| r.data.as_ref())
            .map(OneOrMany::as_slice)
            .unwrap_or(&[])
    }
}

/// Lookup of `included` records by type, then id.
pub struct IncludedIndex<'a> {
    by_type: HashMap<&'a str, HashMap<&'a str, &'a Resource>>,
}

impl<'a> IncludedIndex<'a> {
    pub fn new(doc: &'a Document) -> Self {
        let mut by_type: HashMap<&'a str, HashMap<&'a str, &'a Resource>> = HashMap::new();
        for r in &doc.included {
            by_type
                .entry(r.kind.as_str())
                .or_default()
                .insert(r.id.as_str(), r);
        }
        Self { by_type }
    }

    fn get(&self, reference: &ResourceRef) -> Option<&'a Resource> {
        self.by_type
            .get(reference.kind.as_str())?
            .get(reference.id.as_str())
            .copied()
    }

    /// Included records referenced by `relationship` on `record`, in reference order.
    fn related(&self, record: &Resource, relationship: &str) -> Vec<&'a Resource> {
        record
            .refs(relationship)
            .iter()
            .filter_map(|r| self.get(r))
            .collect()
    }
}

// =============================================================================
// Summaries
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionNeed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_position_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_count: Option<i64>,
}

/// A person scheduled on a plan (`PlanPerson` upstream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamMember {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_position_name: Option<String>,
    /// Upstream confirmation status: `C`onfirmed, `U`nconfirmed or `D`eclined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub plan_id: String,
    /// `sort_date` when present, otherwise the human-readable `dates`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dates: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_title: Option<String>,
    pub times: Vec<PlanTime>,
    pub positions_needed: Vec<PositionNeed>,
    pub team_members: Vec<TeamMember>,
}

// =============================================================================
// Projections
// =============================================================================

pub fn person_summary(person: &Resource, index: &IncludedIndex<'_>) -> PersonSummary {
    PersonSummary {
        id: person.id.clone(),
        name: person.str_attr("name"),
        first_name: person.str_attr("first_name"),
        last_name: person.str_attr("last_name"),
        emails: index
            .related(person, "emails")
            .into_iter()
            .filter_map(|e| e.str_attr("address"))
            .collect(),
        phones: index
            .related(person, "phone_numbers")
            .into_iter()
            .filter_map(|p| p.str_attr("number"))
            .collect(),
    }
}

pub fn plan_summary(plan: &Resource, index: &IncludedIndex<'_>) -> PlanSummary {
    PlanSummary {
        plan_id: plan.id.clone(),
        dates: plan.str_attr("sort_date").or_else(|| plan.str_attr("dates")),
        title: plan.str_attr("title"),
        series_title: plan.str_attr("series_title"),
        times: index
            .related(plan, "plan_times")
            .into_iter()
            .map(|t| PlanTime {
                name: t.str_attr("name"),
                starts_at: t.str_attr("starts_at"),
                ends_at: t.str_attr("ends_at"),
            })
            .collect(),
        positions_needed: index
            .related(plan, "needed_positions")
            .into_iter()
            .map(|n| PositionNeed {
                team_position_name: n.str_attr("team_position_name"),
                quantity: n.int_attr("quantity"),
                assigned_count: n.int_attr("assigned_count"),
            })
            .collect(),
        team_members: index
            .related(plan, "team_members")
            .into_iter()
            .map(|m| team_member(m, index))
            .collect(),
    }
}

fn team_member(member: &Resource, index: &IncludedIndex<'_>) -> TeamMember {
    let person = index.related(member, "person").into_iter().next();
    let person_name = || {
        let person = person?;
        person.str_attr("name").or_else(|| {
            match (person.str_attr("first_name"), person.str_attr("last_name")) {
                (Some(first), Some(last)) => Some(format!("{first} {last}")),
                (first, last) => first.or(last),
            }
        })
    };

    TeamMember {
        person_id: member.refs("person").first().map(|r| r.id.clone()),
        name: member.str_attr("name").or_else(person_name),
        team_position_name: member.str_attr("team_position_name"),
        status: member.str_attr("status"),
    }
}

/// All people in a `/people/v2/people` document.
pub fn people(doc: &Document) -> Vec<PersonSummary> {
    let index = IncludedIndex::new(doc);
    doc.primary()
        .iter()
        .map(|p| person_summary(p, &index))
        .collect()
}

/// All plans in a plans document (list or single).
pub fn plans(doc: &Document) -> Vec<PlanSummary> {
    let index = IncludedIndex::new(doc);
    doc.primary()
        .iter()
        .map(|p| plan_summary(p, &index))
        .collect()
}
