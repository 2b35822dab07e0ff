//! Existence gates for the collaborators this core does not own: the
//! namespace registry and the policy/role catalogs.

use async_trait::async_trait;
use dashmap::DashSet;
use reqwest::{header::HeaderMap, StatusCode, Url};
use service_core::observability::inject_trace_context;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use super::ServiceError;
use crate::models::{MembershipKind, ResourceRef, GLOBAL_NAMESPACE};

#[async_trait]
pub trait NamespaceGate: Send + Sync {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait PolicyGate: Send + Sync {
    async fn policy_exists(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait RoleGate: Send + Sync {
    async fn role_exists(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError>;
}

/// Namespace checks in the three shapes the core needs.
///
/// Writes fail with `FailedPrecondition`, addressed reads with `NotFound`,
/// and boolean/listing paths just get `false`. The global namespace always
/// exists and never reaches the gate.
#[derive(Clone)]
pub struct Namespaces {
    gate: Arc<dyn NamespaceGate>,
}

impl Namespaces {
    pub fn new(gate: Arc<dyn NamespaceGate>) -> Self {
        Self { gate }
    }

    pub async fn exists(&self, namespace: &str) -> Result<bool, ServiceError> {
        if namespace == GLOBAL_NAMESPACE {
            return Ok(true);
        }
        self.gate.namespace_exists(namespace).await
    }

    pub async fn require_for_write(&self, namespace: &str) -> Result<(), ServiceError> {
        if self.exists(namespace).await? {
            Ok(())
        } else {
            Err(ServiceError::namespace_missing(namespace))
        }
    }

    pub async fn require_for_read(
        &self,
        namespace: &str,
        not_found: fn() -> ServiceError,
    ) -> Result<(), ServiceError> {
        if self.exists(namespace).await? {
            Ok(())
        } else {
            Err(not_found())
        }
    }
}

/// Policy and role gates paired, selected by membership kind.
#[derive(Clone)]
pub struct ReferenceGates {
    policies: Arc<dyn PolicyGate>,
    roles: Arc<dyn RoleGate>,
}

impl ReferenceGates {
    pub fn new(policies: Arc<dyn PolicyGate>, roles: Arc<dyn RoleGate>) -> Self {
        Self { policies, roles }
    }

    pub async fn exists(
        &self,
        kind: MembershipKind,
        reference: &ResourceRef,
    ) -> Result<bool, ServiceError> {
        match kind {
            MembershipKind::Policy => {
                self.policies
                    .policy_exists(&reference.namespace, reference.uuid)
                    .await
            }
            MembershipKind::Role => {
                self.roles
                    .role_exists(&reference.namespace, reference.uuid)
                    .await
            }
        }
    }
}

/// HTTP client for a registry exposing existence as `GET` → 200/404.
///
/// Namespaces: `GET {base}/namespaces/{name}`.
/// Policies/roles: `GET {base}/namespaces/{ns}/policies/{uuid}` and `.../roles/{uuid}`.
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, anyhow::Error> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid registry URL '{}': {}", base_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow::anyhow!("Registry URL '{}' cannot be a base", base_url));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build registry HTTP client: {}", e))?;

        tracing::info!(base_url = %base_url, "Registry client configured");

        Ok(Self { http, base_url })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Registry URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn query(&self, url: Url) -> Result<bool, ServiceError> {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);

        let response = self
            .http
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(url = %url, error = %e, "Registry request failed");
                anyhow::anyhow!("Registry request failed: {}", e)
            })?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                tracing::error!(url = %url, status = %status, "Unexpected registry response");
                Err(ServiceError::Internal(anyhow::anyhow!(
                    "Unexpected registry response: {}",
                    status
                )))
            }
        }
    }
}

#[async_trait]
impl NamespaceGate for RegistryClient {
    #[instrument(skip(self))]
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, ServiceError> {
        let url = self.url(&["namespaces", namespace])?;
        self.query(url).await
    }
}

#[async_trait]
impl PolicyGate for RegistryClient {
    #[instrument(skip(self))]
    async fn policy_exists(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        let uuid = uuid.to_string();
        let url = self.url(&["namespaces", namespace, "policies", &uuid])?;
        self.query(url).await
    }
}

#[async_trait]
impl RoleGate for RegistryClient {
    #[instrument(skip(self))]
    async fn role_exists(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        let uuid = uuid.to_string();
        let url = self.url(&["namespaces", namespace, "roles", &uuid])?;
        self.query(url).await
    }
}

/// In-process registry used in dev mode and tests.
#[derive(Default)]
pub struct StaticRegistry {
    namespaces: DashSet<String>,
    policies: DashSet<(String, Uuid)>,
    roles: DashSet<(String, Uuid)>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespaces<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        for ns in namespaces {
            registry.add_namespace(ns);
        }
        registry
    }

    pub fn add_namespace(&self, namespace: impl Into<String>) {
        self.namespaces.insert(namespace.into());
    }

    pub fn remove_namespace(&self, namespace: &str) {
        self.namespaces.remove(namespace);
    }

    pub fn add_policy(&self, namespace: impl Into<String>, uuid: Uuid) {
        self.policies.insert((namespace.into(), uuid));
    }

    pub fn remove_policy(&self, namespace: &str, uuid: Uuid) {
        self.policies.remove(&(namespace.to_string(), uuid));
    }

    pub fn add_role(&self, namespace: impl Into<String>, uuid: Uuid) {
        self.roles.insert((namespace.into(), uuid));
    }

    pub fn remove_role(&self, namespace: &str, uuid: Uuid) {
        self.roles.remove(&(namespace.to_string(), uuid));
    }
}

#[async_trait]
impl NamespaceGate for StaticRegistry {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, ServiceError> {
        Ok(self.namespaces.contains(namespace))
    }
}

#[async_trait]
impl PolicyGate for StaticRegistry {
    async fn policy_exists(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        Ok(self.policies.contains(&(namespace.to_string(), uuid)))
    }
}

#[async_trait]
impl RoleGate for StaticRegistry {
    async fn role_exists(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        Ok(self.roles.contains(&(namespace.to_string(), uuid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_global_namespace_always_exists() {
        let namespaces = Namespaces::new(Arc::new(StaticRegistry::new()));
        assert!(namespaces.exists(GLOBAL_NAMESPACE).await.unwrap());
        assert!(!namespaces.exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_require_shapes() {
        let registry = Arc::new(StaticRegistry::with_namespaces(["acme"]));
        let namespaces = Namespaces::new(registry.clone());

        assert!(namespaces.require_for_write("acme").await.is_ok());
        assert!(matches!(
            namespaces.require_for_write("globex").await,
            Err(ServiceError::FailedPrecondition(_))
        ));
        assert!(matches!(
            namespaces
                .require_for_read("globex", ServiceError::identity_not_found)
                .await,
            Err(ServiceError::NotFound(_))
        ));

        registry.remove_namespace("acme");
        assert!(!namespaces.exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_reference_gates_select_by_kind() {
        let registry = Arc::new(StaticRegistry::new());
        let policy = ResourceRef::new("acme", Uuid::new_v4());
        registry.add_policy("acme", policy.uuid);

        let gates = ReferenceGates::new(registry.clone(), registry.clone());
        assert!(gates.exists(MembershipKind::Policy, &policy).await.unwrap());
        assert!(!gates.exists(MembershipKind::Role, &policy).await.unwrap());
    }

    #[test]
    fn test_registry_url_encodes_segments() {
        let client = RegistryClient::new("http://registry.local/api/", Duration::from_secs(1))
            .unwrap();
        let url = client.url(&["namespaces", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://registry.local/api/namespaces/a%20b%2Fc");
    }

    #[test]
    fn test_registry_rejects_bad_url() {
        assert!(RegistryClient::new("not a url", Duration::from_secs(1)).is_err());
    }
}
