use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::{CredentialStore, IdentityStore, TokenStore};
use crate::models::{Identity, MembershipKind, Page, PasswordCredential, ResourceRef, TokenData};
use crate::services::ServiceError;

struct Stored<T> {
    seq: u64,
    record: T,
}

/// DashMap-backed store for dev mode and tests.
///
/// Each mutation runs under the shard lock of its key, which gives the same
/// per-record atomicity the Postgres store gets from row locks.
#[derive(Default)]
pub struct MemoryStore {
    seq: AtomicU64,
    identities: DashMap<(String, Uuid), Stored<Identity>>,
    service_index: DashMap<(String, String, String), Uuid>,
    tokens: DashMap<(String, Uuid), Stored<TokenData>>,
    passwords: DashMap<(String, Uuid), PasswordCredential>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Apply `change` to a stored identity; it returns whether the record
    /// actually changed, in which case the version is bumped.
    fn mutate_identity(
        &self,
        namespace: &str,
        uuid: Uuid,
        change: impl FnOnce(&mut Identity) -> bool,
    ) -> Option<Identity> {
        let mut entry = self.identities.get_mut(&(namespace.to_string(), uuid))?;
        if change(&mut entry.record) {
            entry.record.touch();
        }
        Some(entry.record.clone())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn insert_identity(&self, identity: &Identity) -> Result<(), ServiceError> {
        if let Some((service, management_id)) = identity.managed.service_key() {
            let index_key = (
                identity.namespace.clone(),
                service.to_string(),
                management_id.to_string(),
            );
            match self.service_index.entry(index_key) {
                Entry::Occupied(_) => {
                    return Err(ServiceError::AlreadyExists(format!(
                        "Identity managed by '{}' with management id '{}'",
                        service, management_id
                    )))
                }
                Entry::Vacant(slot) => {
                    slot.insert(identity.uuid);
                }
            }
        }

        self.identities.insert(
            (identity.namespace.clone(), identity.uuid),
            Stored {
                seq: self.next_seq(),
                record: identity.clone(),
            },
        );
        Ok(())
    }

    async fn find_identity(
        &self,
        namespace: &str,
        uuid: Uuid,
    ) -> Result<Option<Identity>, ServiceError> {
        Ok(self
            .identities
            .get(&(namespace.to_string(), uuid))
            .map(|entry| entry.record.clone()))
    }

    async fn find_service_managed(
        &self,
        namespace: &str,
        service: &str,
        management_id: &str,
    ) -> Result<Option<Identity>, ServiceError> {
        let uuid = self
            .service_index
            .get(&(
                namespace.to_string(),
                service.to_string(),
                management_id.to_string(),
            ))
            .map(|entry| *entry.value());

        match uuid {
            Some(uuid) => self.find_identity(namespace, uuid).await,
            None => Ok(None),
        }
    }

    async fn list_identities(
        &self,
        namespace: &str,
        page: Page,
    ) -> Result<Vec<Identity>, ServiceError> {
        let mut matching: Vec<(u64, Identity)> = self
            .identities
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| (entry.seq, entry.record.clone()))
            .collect();
        matching.sort_by_key(|(seq, _)| *seq);

        Ok(page.apply(matching.into_iter().map(|(_, identity)| identity)))
    }

    async fn update_name(
        &self,
        namespace: &str,
        uuid: Uuid,
        name: &str,
    ) -> Result<Option<Identity>, ServiceError> {
        Ok(self.mutate_identity(namespace, uuid, |identity| {
            if identity.name == name {
                return false;
            }
            identity.name = name.to_string();
            true
        }))
    }

    async fn set_active(
        &self,
        namespace: &str,
        uuid: Uuid,
        active: bool,
    ) -> Result<Option<Identity>, ServiceError> {
        Ok(self.mutate_identity(namespace, uuid, |identity| {
            let changed = identity.active != active;
            identity.active = active;
            changed
        }))
    }

    async fn add_membership(
        &self,
        kind: MembershipKind,
        namespace: &str,
        uuid: Uuid,
        reference: &ResourceRef,
    ) -> Result<Option<Identity>, ServiceError> {
        Ok(self.mutate_identity(namespace, uuid, |identity| {
            identity.memberships_mut(kind).insert(reference.clone())
        }))
    }

    async fn remove_membership(
        &self,
        kind: MembershipKind,
        namespace: &str,
        uuid: Uuid,
        reference: &ResourceRef,
    ) -> Result<Option<Identity>, ServiceError> {
        Ok(self.mutate_identity(namespace, uuid, |identity| {
            identity.memberships_mut(kind).remove(reference)
        }))
    }

    async fn delete_identity(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        let Some((_, removed)) = self.identities.remove(&(namespace.to_string(), uuid)) else {
            return Ok(false);
        };

        if let Some((service, management_id)) = removed.record.managed.service_key() {
            self.service_index.remove_if(
                &(
                    namespace.to_string(),
                    service.to_string(),
                    management_id.to_string(),
                ),
                |_, owner| *owner == uuid,
            );
        }
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, token: &TokenData) -> Result<(), ServiceError> {
        self.tokens.insert(
            (token.namespace.clone(), token.uuid),
            Stored {
                seq: self.next_seq(),
                record: token.clone(),
            },
        );
        Ok(())
    }

    async fn find_token(
        &self,
        namespace: &str,
        uuid: Uuid,
    ) -> Result<Option<TokenData>, ServiceError> {
        Ok(self
            .tokens
            .get(&(namespace.to_string(), uuid))
            .map(|entry| entry.record.clone()))
    }

    async fn list_tokens_for_identity(
        &self,
        namespace: &str,
        identity: Uuid,
        active: Option<bool>,
        page: Page,
    ) -> Result<Vec<TokenData>, ServiceError> {
        let mut matching: Vec<(u64, TokenData)> = self
            .tokens
            .iter()
            .filter(|entry| {
                let token = &entry.record;
                token.namespace == namespace
                    && token.identity == identity
                    && active.map_or(true, |active| token.disabled != active)
            })
            .map(|entry| (entry.seq, entry.record.clone()))
            .collect();
        matching.sort_by_key(|(seq, _)| *seq);

        Ok(page.apply(matching.into_iter().map(|(_, token)| token)))
    }

    async fn disable_token(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        match self.tokens.get_mut(&(namespace.to_string(), uuid)) {
            Some(mut entry) => {
                entry.record.disabled = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_token(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        Ok(self.tokens.remove(&(namespace.to_string(), uuid)).is_some())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn upsert_password(
        &self,
        namespace: &str,
        identity: Uuid,
        password_hash: &str,
    ) -> Result<bool, ServiceError> {
        match self.passwords.entry((namespace.to_string(), identity)) {
            Entry::Occupied(mut existing) => {
                let credential = existing.get_mut();
                credential.password_hash = password_hash.to_string();
                credential.updated_utc = Utc::now();
                Ok(false)
            }
            Entry::Vacant(slot) => {
                slot.insert(PasswordCredential::new(
                    namespace.to_string(),
                    identity,
                    password_hash.to_string(),
                ));
                Ok(true)
            }
        }
    }

    async fn find_password(
        &self,
        namespace: &str,
        identity: Uuid,
    ) -> Result<Option<PasswordCredential>, ServiceError> {
        Ok(self
            .passwords
            .get(&(namespace.to_string(), identity))
            .map(|entry| entry.value().clone()))
    }

    async fn delete_password(&self, namespace: &str, identity: Uuid) -> Result<bool, ServiceError> {
        Ok(self
            .passwords
            .remove(&(namespace.to_string(), identity))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Managed, Scope};
    use std::sync::Arc;

    fn service_managed(namespace: &str, management_id: &str) -> Identity {
        Identity::new(
            namespace.into(),
            "device".into(),
            true,
            Managed::ServiceManaged {
                service: "fleet".into(),
                reason: "provisioned".into(),
                management_id: management_id.into(),
            },
        )
    }

    #[tokio::test]
    async fn test_concurrent_add_membership_converges() {
        let store = Arc::new(MemoryStore::new());
        let identity = Identity::new("acme".into(), "svc".into(), true, Managed::Unmanaged);
        store.insert_identity(&identity).await.unwrap();
        let policy = ResourceRef::new("acme", Uuid::new_v4());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let policy = policy.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add_membership(MembershipKind::Policy, "acme", identity.uuid, &policy)
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_some());
        }

        let stored = store.find_identity("acme", identity.uuid).await.unwrap().unwrap();
        assert_eq!(stored.policies.len(), 1);
        assert!(stored.policies.contains(&policy));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_membership_on_missing_identity() {
        let store = MemoryStore::new();
        let reference = ResourceRef::new("", Uuid::new_v4());
        let result = store
            .add_membership(MembershipKind::Role, "", Uuid::new_v4(), &reference)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_service_index_uniqueness_and_release() {
        let store = MemoryStore::new();
        let first = service_managed("acme", "dev-1");
        store.insert_identity(&first).await.unwrap();

        let duplicate = service_managed("acme", "dev-1");
        assert!(matches!(
            store.insert_identity(&duplicate).await,
            Err(ServiceError::AlreadyExists(_))
        ));

        // Same pair in another namespace is a different key.
        store.insert_identity(&service_managed("globex", "dev-1")).await.unwrap();

        let found = store
            .find_service_managed("acme", "fleet", "dev-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.uuid, first.uuid);

        assert!(store.delete_identity("acme", first.uuid).await.unwrap());
        assert!(store
            .find_service_managed("acme", "fleet", "dev-1")
            .await
            .unwrap()
            .is_none());
        store.insert_identity(&duplicate).await.unwrap();
    }

    #[tokio::test]
    async fn test_version_only_moves_on_change() {
        let store = MemoryStore::new();
        let identity = Identity::new("".into(), "a".into(), true, Managed::Unmanaged);
        store.insert_identity(&identity).await.unwrap();

        let same = store.set_active("", identity.uuid, true).await.unwrap().unwrap();
        assert_eq!(same.version, 1);

        let renamed = store.update_name("", identity.uuid, "b").await.unwrap().unwrap();
        assert_eq!(renamed.version, 2);
        assert_eq!(renamed.name, "b");
    }

    #[tokio::test]
    async fn test_token_listing_order_and_filter() {
        let store = MemoryStore::new();
        let identity = Uuid::new_v4();
        let scopes = vec![Scope {
            namespace: "acme".into(),
            resources: vec!["devices".into()],
            actions: vec!["read".into()],
        }];

        let mut ids = Vec::new();
        for i in 0..5 {
            let token = TokenData::new("acme".into(), identity, scopes.clone(), format!("t{}", i));
            store.insert_token(&token).await.unwrap();
            ids.push(token.uuid);
        }
        // Another identity's token must not show up.
        store
            .insert_token(&TokenData::new("acme".into(), Uuid::new_v4(), vec![], "x".into()))
            .await
            .unwrap();
        store.disable_token("acme", ids[1]).await.unwrap();

        let all = store
            .list_tokens_for_identity("acme", identity, None, Page::default())
            .await
            .unwrap();
        assert_eq!(all.iter().map(|t| t.uuid).collect::<Vec<_>>(), ids);

        let active = store
            .list_tokens_for_identity("acme", identity, Some(true), Page::default())
            .await
            .unwrap();
        assert_eq!(active.len(), 4);
        assert!(active.iter().all(|t| !t.disabled));

        let disabled = store
            .list_tokens_for_identity("acme", identity, Some(false), Page::default())
            .await
            .unwrap();
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].uuid, ids[1]);

        let page = store
            .list_tokens_for_identity("acme", identity, None, Page::new(Some(1), Some(2)))
            .await
            .unwrap();
        assert_eq!(page.iter().map(|t| t.uuid).collect::<Vec<_>>(), ids[1..3]);
    }

    #[tokio::test]
    async fn test_password_upsert_reports_creation() {
        let store = MemoryStore::new();
        let identity = Uuid::new_v4();

        assert!(store.upsert_password("acme", identity, "h1").await.unwrap());
        assert!(!store.upsert_password("acme", identity, "h2").await.unwrap());

        let credential = store.find_password("acme", identity).await.unwrap().unwrap();
        assert_eq!(credential.password_hash, "h2");
        assert!(credential.updated_utc >= credential.created_utc);

        assert!(store.delete_password("acme", identity).await.unwrap());
        assert!(!store.delete_password("acme", identity).await.unwrap());
    }
}
