//! Services layer for identity-service.
//!
//! The three engines (identity directory, token lifecycle, password
//! credentials) plus the capabilities they are built from.

pub mod cache;
pub mod error;
pub mod gates;
mod identity;
pub mod metrics;
mod password;
pub mod signer;
pub mod store;
mod token;

pub use cache::{CachedRecords, MemoryCache, NoopCache, RecordCache, RedisCache};
pub use error::ServiceError;
pub use gates::{
    NamespaceGate, Namespaces, PolicyGate, ReferenceGates, RegistryClient, RoleGate,
    StaticRegistry,
};
pub use identity::{CreateIdentity, IdentityService};
pub use password::PasswordService;
pub use signer::{TokenClaims, TokenSigner};
pub use store::{CredentialStore, IdentityStore, MemoryStore, PgStore, TokenStore};
pub use token::TokenService;
