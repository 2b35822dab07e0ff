//! Identity directory: lifecycle, managed-by relationships and policy/role
//! membership of namespace-scoped identities.

use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::cache::CachedRecords;
use super::gates::{Namespaces, ReferenceGates};
use super::store::IdentityStore;
use super::ServiceError;
use crate::models::{Identity, Managed, MembershipKind, Page, ResourceRef};
use crate::utils::normalize_name;

const RECORD: &str = "identity";

/// Input for `IdentityService::create`.
#[derive(Debug, Clone)]
pub struct CreateIdentity {
    pub namespace: String,
    pub name: String,
    pub active: bool,
    pub managed: Managed,
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    namespaces: Namespaces,
    references: ReferenceGates,
    cache: CachedRecords,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        namespaces: Namespaces,
        references: ReferenceGates,
        cache: CachedRecords,
    ) -> Self {
        Self {
            store,
            namespaces,
            references,
            cache,
        }
    }

    #[instrument(skip(self, input), fields(namespace = %input.namespace, managed = input.managed.as_str()))]
    pub async fn create(&self, input: CreateIdentity) -> Result<Identity, ServiceError> {
        let name = normalize_name(&input.name)?;
        check_managed(&input.managed)?;
        self.namespaces.require_for_write(&input.namespace).await?;

        let identity = Identity::new(input.namespace, name, input.active, input.managed);
        self.store.insert_identity(&identity).await?;

        info!(identity = %identity.uuid, "Identity created");
        Ok(identity)
    }

    #[instrument(skip(self))]
    pub async fn get(
        &self,
        namespace: &str,
        uuid: Uuid,
        use_cache: bool,
    ) -> Result<Identity, ServiceError> {
        self.namespaces
            .require_for_read(namespace, ServiceError::identity_not_found)
            .await?;
        self.lookup(namespace, uuid, use_cache)
            .await?
            .ok_or_else(ServiceError::identity_not_found)
    }

    /// `false` for an absent identity or namespace.
    #[instrument(skip(self))]
    pub async fn exists(
        &self,
        namespace: &str,
        uuid: Uuid,
        use_cache: bool,
    ) -> Result<bool, ServiceError> {
        if !self.namespaces.exists(namespace).await? {
            return Ok(false);
        }
        Ok(self.lookup(namespace, uuid, use_cache).await?.is_some())
    }

    #[instrument(skip(self))]
    pub async fn get_service_managed(
        &self,
        namespace: &str,
        service: &str,
        management_id: &str,
    ) -> Result<Identity, ServiceError> {
        self.namespaces
            .require_for_read(namespace, ServiceError::identity_not_found)
            .await?;
        self.store
            .find_service_managed(namespace, service, management_id)
            .await?
            .ok_or_else(ServiceError::identity_not_found)
    }

    /// Identities of a namespace in creation order; empty for an absent namespace.
    #[instrument(skip(self))]
    pub async fn list(&self, namespace: &str, page: Page) -> Result<Vec<Identity>, ServiceError> {
        if !self.namespaces.exists(namespace).await? {
            return Ok(Vec::new());
        }
        self.store.list_identities(namespace, page).await
    }

    #[instrument(skip(self, name))]
    pub async fn update(
        &self,
        namespace: &str,
        uuid: Uuid,
        name: &str,
    ) -> Result<Identity, ServiceError> {
        let name = normalize_name(name)?;
        self.namespaces
            .require_for_read(namespace, ServiceError::identity_not_found)
            .await?;

        let identity = self
            .store
            .update_name(namespace, uuid, &name)
            .await?
            .ok_or_else(ServiceError::identity_not_found)?;
        self.evict(namespace, uuid).await;

        info!(version = identity.version, "Identity renamed");
        Ok(identity)
    }

    #[instrument(skip(self))]
    pub async fn set_active(
        &self,
        namespace: &str,
        uuid: Uuid,
        active: bool,
    ) -> Result<Identity, ServiceError> {
        self.namespaces
            .require_for_read(namespace, ServiceError::identity_not_found)
            .await?;

        let identity = self
            .store
            .set_active(namespace, uuid, active)
            .await?
            .ok_or_else(ServiceError::identity_not_found)?;
        self.evict(namespace, uuid).await;

        info!(version = identity.version, "Identity active flag set");
        Ok(identity)
    }

    /// Idempotent; returns whether the identity existed.
    #[instrument(skip(self))]
    pub async fn delete(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        if !self.namespaces.exists(namespace).await? {
            return Ok(false);
        }

        let existed = self.store.delete_identity(namespace, uuid).await?;
        self.evict(namespace, uuid).await;

        if existed {
            info!("Identity deleted");
        }
        Ok(existed)
    }

    pub async fn add_policy(
        &self,
        namespace: &str,
        uuid: Uuid,
        policy: ResourceRef,
    ) -> Result<Identity, ServiceError> {
        self.add_membership(MembershipKind::Policy, namespace, uuid, policy)
            .await
    }

    pub async fn add_role(
        &self,
        namespace: &str,
        uuid: Uuid,
        role: ResourceRef,
    ) -> Result<Identity, ServiceError> {
        self.add_membership(MembershipKind::Role, namespace, uuid, role)
            .await
    }

    pub async fn remove_policy(
        &self,
        namespace: &str,
        uuid: Uuid,
        policy: ResourceRef,
    ) -> Result<Identity, ServiceError> {
        self.remove_membership(MembershipKind::Policy, namespace, uuid, policy)
            .await
    }

    pub async fn remove_role(
        &self,
        namespace: &str,
        uuid: Uuid,
        role: ResourceRef,
    ) -> Result<Identity, ServiceError> {
        self.remove_membership(MembershipKind::Role, namespace, uuid, role)
            .await
    }

    /// Identity first (NotFound), then the referenced resource
    /// (FailedPrecondition), then an atomic add-if-absent.
    #[instrument(skip(self), fields(kind = kind.as_str()))]
    async fn add_membership(
        &self,
        kind: MembershipKind,
        namespace: &str,
        uuid: Uuid,
        reference: ResourceRef,
    ) -> Result<Identity, ServiceError> {
        self.namespaces
            .require_for_read(namespace, ServiceError::identity_not_found)
            .await?;
        if self.store.find_identity(namespace, uuid).await?.is_none() {
            return Err(ServiceError::identity_not_found());
        }

        if !self.references.exists(kind, &reference).await? {
            return Err(ServiceError::FailedPrecondition(format!(
                "{} {} does not exist in namespace '{}'",
                capitalized(kind),
                reference.uuid,
                reference.namespace
            )));
        }

        let identity = self
            .store
            .add_membership(kind, namespace, uuid, &reference)
            .await?
            .ok_or_else(ServiceError::identity_not_found)?;
        self.evict(namespace, uuid).await;

        info!(
            ref_namespace = %reference.namespace,
            ref_uuid = %reference.uuid,
            version = identity.version,
            "Membership added"
        );
        Ok(identity)
    }

    /// Only the identity must exist; removing a non-member is a no-op.
    #[instrument(skip(self), fields(kind = kind.as_str()))]
    async fn remove_membership(
        &self,
        kind: MembershipKind,
        namespace: &str,
        uuid: Uuid,
        reference: ResourceRef,
    ) -> Result<Identity, ServiceError> {
        self.namespaces
            .require_for_read(namespace, ServiceError::identity_not_found)
            .await?;

        let identity = self
            .store
            .remove_membership(kind, namespace, uuid, &reference)
            .await?
            .ok_or_else(ServiceError::identity_not_found)?;
        self.evict(namespace, uuid).await;

        info!(
            ref_namespace = %reference.namespace,
            ref_uuid = %reference.uuid,
            version = identity.version,
            "Membership removed"
        );
        Ok(identity)
    }

    async fn lookup(
        &self,
        namespace: &str,
        uuid: Uuid,
        use_cache: bool,
    ) -> Result<Option<Identity>, ServiceError> {
        if !use_cache {
            return self.store.find_identity(namespace, uuid).await;
        }

        let key = CachedRecords::identity_key(namespace, uuid);
        if let Some(identity) = self.cache.fetch::<Identity>(RECORD, &key).await {
            return Ok(Some(identity));
        }

        let identity = self.store.find_identity(namespace, uuid).await?;
        if let Some(identity) = &identity {
            self.cache.store(RECORD, &key, identity).await;
        }
        Ok(identity)
    }

    async fn evict(&self, namespace: &str, uuid: Uuid) {
        self.cache
            .invalidate(RECORD, &CachedRecords::identity_key(namespace, uuid))
            .await;
    }
}

fn check_managed(managed: &Managed) -> Result<(), ServiceError> {
    if let Managed::ServiceManaged {
        service,
        management_id,
        ..
    } = managed
    {
        if service.trim().is_empty() || management_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "service-managed identities need a service and a management id".to_string(),
            ));
        }
    }
    Ok(())
}

fn capitalized(kind: MembershipKind) -> &'static str {
    match kind {
        MembershipKind::Policy => "Policy",
        MembershipKind::Role => "Role",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MemoryCache;
    use crate::services::gates::StaticRegistry;
    use crate::services::store::MemoryStore;

    struct Fixture {
        service: IdentityService,
        registry: Arc<StaticRegistry>,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(StaticRegistry::with_namespaces(["acme"]));
        let store = Arc::new(MemoryStore::new());
        let service = IdentityService::new(
            store.clone(),
            Namespaces::new(registry.clone()),
            ReferenceGates::new(registry.clone(), registry.clone()),
            CachedRecords::new(Arc::new(MemoryCache::new()), 300),
        );
        Fixture {
            service,
            registry,
            store,
        }
    }

    fn unmanaged(namespace: &str, name: &str) -> CreateIdentity {
        CreateIdentity {
            namespace: namespace.into(),
            name: name.into(),
            active: true,
            managed: Managed::Unmanaged,
        }
    }

    #[tokio::test]
    async fn test_create_requires_namespace() {
        let f = fixture();
        assert!(matches!(
            f.service.create(unmanaged("globex", "svc")).await,
            Err(ServiceError::FailedPrecondition(_))
        ));

        let identity = f.service.create(unmanaged("", "  root  ")).await.unwrap();
        assert_eq!(identity.name, "root");
        assert_eq!(identity.namespace, "");
    }

    #[tokio::test]
    async fn test_create_rejects_bad_name() {
        let f = fixture();
        assert!(matches!(
            f.service.create(unmanaged("acme", "")).await,
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_set_active_round_trip() {
        let f = fixture();
        let identity = f.service.create(unmanaged("acme", "svc")).await.unwrap();

        f.service.set_active("acme", identity.uuid, false).await.unwrap();
        assert!(!f.service.get("acme", identity.uuid, false).await.unwrap().active);

        f.service.set_active("acme", identity.uuid, true).await.unwrap();
        assert!(f.service.get("acme", identity.uuid, true).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_reads_in_missing_namespace() {
        let f = fixture();
        let identity = f.service.create(unmanaged("acme", "svc")).await.unwrap();
        f.registry.remove_namespace("acme");

        assert!(matches!(
            f.service.get("acme", identity.uuid, false).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(!f.service.exists("acme", identity.uuid, false).await.unwrap());
        assert!(f.service.list("acme", Page::default()).await.unwrap().is_empty());
        assert!(!f.service.delete("acme", identity.uuid).await.unwrap());

        // The record itself survives namespace removal.
        assert!(f.store.find_identity("acme", identity.uuid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_add_policy_is_idempotent() {
        let f = fixture();
        let identity = f.service.create(unmanaged("acme", "svc")).await.unwrap();
        let policy = ResourceRef::new("acme", Uuid::new_v4());
        f.registry.add_policy("acme", policy.uuid);

        for _ in 0..5 {
            f.service
                .add_policy("acme", identity.uuid, policy.clone())
                .await
                .unwrap();
        }

        let stored = f.service.get("acme", identity.uuid, false).await.unwrap();
        assert_eq!(stored.policies.len(), 1);
        assert!(stored.policies.contains(&policy));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_add_missing_reference_fails_precondition() {
        let f = fixture();
        let identity = f.service.create(unmanaged("acme", "svc")).await.unwrap();

        assert!(matches!(
            f.service
                .add_role("acme", identity.uuid, ResourceRef::new("acme", Uuid::new_v4()))
                .await,
            Err(ServiceError::FailedPrecondition(_))
        ));
        assert!(f
            .service
            .get("acme", identity.uuid, false)
            .await
            .unwrap()
            .roles
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_identity_wins_over_missing_reference() {
        let f = fixture();
        assert!(matches!(
            f.service
                .add_policy("acme", Uuid::new_v4(), ResourceRef::new("acme", Uuid::new_v4()))
                .await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_tolerates_non_members_and_deleted_targets() {
        let f = fixture();
        let identity = f.service.create(unmanaged("acme", "svc")).await.unwrap();
        let role = ResourceRef::new("", Uuid::new_v4());
        f.registry.add_role("", role.uuid);
        f.service.add_role("acme", identity.uuid, role.clone()).await.unwrap();

        f.registry.remove_role("", role.uuid);
        let after = f
            .service
            .remove_role("acme", identity.uuid, role.clone())
            .await
            .unwrap();
        assert!(after.roles.is_empty());

        let again = f.service.remove_role("acme", identity.uuid, role).await.unwrap();
        assert_eq!(again.version, after.version);

        assert!(matches!(
            f.service
                .remove_policy("acme", Uuid::new_v4(), ResourceRef::new("", Uuid::new_v4()))
                .await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mutation_invalidates_cached_copy() {
        let f = fixture();
        let identity = f.service.create(unmanaged("acme", "svc")).await.unwrap();

        // Prime the cache, then rename.
        f.service.get("acme", identity.uuid, true).await.unwrap();
        f.service.update("acme", identity.uuid, "renamed").await.unwrap();

        let cached = f.service.get("acme", identity.uuid, true).await.unwrap();
        assert_eq!(cached.name, "renamed");
    }

    #[tokio::test]
    async fn test_service_managed_lookup_and_uniqueness() {
        let f = fixture();
        let input = CreateIdentity {
            namespace: "acme".into(),
            name: "device".into(),
            active: true,
            managed: Managed::ServiceManaged {
                service: "fleet".into(),
                reason: "provisioned".into(),
                management_id: "dev-1".into(),
            },
        };

        let identity = f.service.create(input.clone()).await.unwrap();
        assert!(matches!(
            f.service.create(input).await,
            Err(ServiceError::AlreadyExists(_))
        ));

        let found = f
            .service
            .get_service_managed("acme", "fleet", "dev-1")
            .await
            .unwrap();
        assert_eq!(found.uuid, identity.uuid);
        assert!(matches!(
            f.service.get_service_managed("acme", "fleet", "dev-2").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let f = fixture();
        let identity = f.service.create(unmanaged("acme", "svc")).await.unwrap();
        assert!(f.service.delete("acme", identity.uuid).await.unwrap());
        assert!(!f.service.delete("acme", identity.uuid).await.unwrap());
        assert!(!f.service.exists("acme", identity.uuid, true).await.unwrap());
    }
}
