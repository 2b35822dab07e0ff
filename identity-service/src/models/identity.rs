//! Identity model - namespace-scoped principals and their authorization links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Weak reference to a policy or role living in some namespace.
///
/// Existence is checked only when the reference is added to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub namespace: String,
    pub uuid: Uuid,
}

impl ResourceRef {
    pub fn new(namespace: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            namespace: namespace.into(),
            uuid,
        }
    }
}

/// Who is responsible for an identity's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Managed {
    #[default]
    Unmanaged,
    ServiceManaged {
        service: String,
        reason: String,
        management_id: String,
    },
    IdentityManaged {
        ref_namespace: String,
        ref_uuid: Uuid,
    },
}

impl Managed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Managed::Unmanaged => "unmanaged",
            Managed::ServiceManaged { .. } => "service",
            Managed::IdentityManaged { .. } => "identity",
        }
    }

    /// `(service, management_id)` for the reverse index, if service-managed.
    pub fn service_key(&self) -> Option<(&str, &str)> {
        match self {
            Managed::ServiceManaged {
                service,
                management_id,
                ..
            } => Some((service.as_str(), management_id.as_str())),
            Managed::Unmanaged | Managed::IdentityManaged { .. } => None,
        }
    }
}

/// Which membership set an association operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipKind {
    Policy,
    Role,
}

impl MembershipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipKind::Policy => "policy",
            MembershipKind::Role => "role",
        }
    }
}

/// Identity entity (namespace-scoped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uuid: Uuid,
    pub namespace: String,
    pub name: String,
    pub active: bool,
    pub managed: Managed,
    pub policies: BTreeSet<ResourceRef>,
    pub roles: BTreeSet<ResourceRef>,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Identity {
    /// Create a new identity with empty membership sets.
    pub fn new(namespace: String, name: String, active: bool, managed: Managed) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            namespace,
            name,
            active,
            managed,
            policies: BTreeSet::new(),
            roles: BTreeSet::new(),
            version: 1,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn memberships(&self, kind: MembershipKind) -> &BTreeSet<ResourceRef> {
        match kind {
            MembershipKind::Policy => &self.policies,
            MembershipKind::Role => &self.roles,
        }
    }

    pub fn memberships_mut(&mut self, kind: MembershipKind) -> &mut BTreeSet<ResourceRef> {
        match kind {
            MembershipKind::Policy => &mut self.policies,
            MembershipKind::Role => &mut self.roles,
        }
    }

    /// Bump the version after a mutation that changed the record.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_utc = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_identity_is_empty() {
        let identity = Identity::new("acme".into(), "svc".into(), true, Managed::Unmanaged);
        assert!(identity.policies.is_empty());
        assert!(identity.roles.is_empty());
        assert_eq!(identity.version, 1);
    }

    #[test]
    fn test_managed_serializes_tagged() {
        let managed = Managed::ServiceManaged {
            service: "fleet".into(),
            reason: "device".into(),
            management_id: "dev-1".into(),
        };
        let json = serde_json::to_value(&managed).unwrap();
        assert_eq!(json["kind"], "service_managed");
        assert_eq!(json["management_id"], "dev-1");
        assert_eq!(managed.service_key(), Some(("fleet", "dev-1")));
        assert_eq!(Managed::Unmanaged.service_key(), None);
    }

    #[test]
    fn test_membership_set_semantics() {
        let mut identity = Identity::new("".into(), "a".into(), true, Managed::Unmanaged);
        let policy = ResourceRef::new("", Uuid::new_v4());
        assert!(identity.memberships_mut(MembershipKind::Policy).insert(policy.clone()));
        assert!(!identity.memberships_mut(MembershipKind::Policy).insert(policy));
        assert_eq!(identity.memberships(MembershipKind::Policy).len(), 1);
        assert!(identity.memberships(MembershipKind::Role).is_empty());
    }
}
