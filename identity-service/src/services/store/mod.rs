//! Persistence seams for identities, token records and password credentials.
//!
//! Implementations must make membership changes and password upserts atomic
//! at the storage layer; callers never load-mutate-store.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use super::ServiceError;
use crate::models::{Identity, MembershipKind, Page, PasswordCredential, ResourceRef, TokenData};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a new identity. A duplicate `(namespace, service, management_id)`
    /// for service-managed identities fails with `AlreadyExists`.
    async fn insert_identity(&self, identity: &Identity) -> Result<(), ServiceError>;

    async fn find_identity(
        &self,
        namespace: &str,
        uuid: Uuid,
    ) -> Result<Option<Identity>, ServiceError>;

    async fn find_service_managed(
        &self,
        namespace: &str,
        service: &str,
        management_id: &str,
    ) -> Result<Option<Identity>, ServiceError>;

    /// Identities of a namespace in creation order.
    async fn list_identities(
        &self,
        namespace: &str,
        page: Page,
    ) -> Result<Vec<Identity>, ServiceError>;

    async fn update_name(
        &self,
        namespace: &str,
        uuid: Uuid,
        name: &str,
    ) -> Result<Option<Identity>, ServiceError>;

    async fn set_active(
        &self,
        namespace: &str,
        uuid: Uuid,
        active: bool,
    ) -> Result<Option<Identity>, ServiceError>;

    /// Add-if-absent. Returns `None` when the identity does not exist.
    async fn add_membership(
        &self,
        kind: MembershipKind,
        namespace: &str,
        uuid: Uuid,
        reference: &ResourceRef,
    ) -> Result<Option<Identity>, ServiceError>;

    /// Remove-if-present. Returns `None` when the identity does not exist.
    async fn remove_membership(
        &self,
        kind: MembershipKind,
        namespace: &str,
        uuid: Uuid,
        reference: &ResourceRef,
    ) -> Result<Option<Identity>, ServiceError>;

    /// Returns whether a record was removed.
    async fn delete_identity(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(&self, token: &TokenData) -> Result<(), ServiceError>;

    async fn find_token(&self, namespace: &str, uuid: Uuid)
        -> Result<Option<TokenData>, ServiceError>;

    /// Tokens of an identity in creation order. `active` filters on the
    /// disabled flag when set.
    async fn list_tokens_for_identity(
        &self,
        namespace: &str,
        identity: Uuid,
        active: Option<bool>,
        page: Page,
    ) -> Result<Vec<TokenData>, ServiceError>;

    /// Returns whether the record exists (and is now disabled).
    async fn disable_token(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError>;

    /// Returns whether a record was removed.
    async fn delete_token(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or overwrite the hash. Returns `true` only on first insertion.
    async fn upsert_password(
        &self,
        namespace: &str,
        identity: Uuid,
        password_hash: &str,
    ) -> Result<bool, ServiceError>;

    async fn find_password(
        &self,
        namespace: &str,
        identity: Uuid,
    ) -> Result<Option<PasswordCredential>, ServiceError>;

    /// Returns whether a record was removed.
    async fn delete_password(&self, namespace: &str, identity: Uuid) -> Result<bool, ServiceError>;
}
