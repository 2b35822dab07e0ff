pub mod admin;
pub mod identity;
pub mod password;
pub mod token;

use serde::{Deserialize, Serialize};

/// `?namespace=` plus the per-call cache switch; a missing namespace is the
/// global one.
#[derive(Debug, Deserialize)]
pub struct RecordQuery {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub use_cache: bool,
}

#[derive(Debug, Deserialize)]
pub struct NamespaceQuery {
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub existed: bool,
}
