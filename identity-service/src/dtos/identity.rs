use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Managed, ResourceRef};

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateIdentityRequest {
    #[serde(default)]
    pub namespace: String,

    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    pub name: String,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default)]
    pub managed: Managed,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateIdentityRequest {
    #[serde(default)]
    pub namespace: String,

    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetActiveRequest {
    #[serde(default)]
    pub namespace: String,
    pub active: bool,
}

/// Body of the policy/role association routes. `namespace` addresses the
/// identity, `ref_namespace`/`ref_uuid` the policy or role.
#[derive(Debug, Deserialize, Validate)]
pub struct MembershipRequest {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub ref_namespace: String,
    pub ref_uuid: Uuid,
}

impl MembershipRequest {
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.ref_namespace.clone(), self.ref_uuid)
    }
}

#[derive(Debug, Deserialize)]
pub struct ListIdentitiesQuery {
    #[serde(default)]
    pub namespace: String,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceManagedQuery {
    #[serde(default)]
    pub namespace: String,
    pub service: String,
    pub management_id: String,
}
