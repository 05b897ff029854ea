//! Signing for the OAuth `state` parameter.

pub mod engine;

pub use engine::{IssuedState, StateSigner};
