//! service-core: listener config, the HTTP error envelope, request-id
//! middleware and tracing setup shared by the identity platform services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
