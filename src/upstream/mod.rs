//! Planning Center upstream: authenticated client, resolver and payload shaping.

pub mod client;
pub mod endpoints;
pub mod resolver;
pub mod shape;

pub use client::{Credentials, UpstreamClient};
pub use endpoints::PlansQuery;
pub use resolver::{match_service_type, ServiceType, ServiceTypeResolver};
pub use shape::{PersonSummary, PlanSummary, TeamMember};
