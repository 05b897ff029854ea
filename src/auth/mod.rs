//! OAuth token lifecycle for Planning Center.

pub mod lifecycle;

pub use lifecycle::{AccessToken, AuthorizationRequest, ConnectionState, TokenManager, TokenStatus};
