//! HTTP handlers for identity-service.

pub mod admin;
pub mod identity;
pub mod metrics;
pub mod password;
pub mod token;
