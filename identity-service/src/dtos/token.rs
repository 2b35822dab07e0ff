use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{Scope, TokenStatus};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTokenRequest {
    #[serde(default)]
    pub namespace: String,
    pub identity: Uuid,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    #[validate(length(max = 4096, message = "Metadata must be at most 4096 characters"))]
    pub metadata: String,
}

/// Token strings are never `Debug`-printed.
#[derive(Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
    #[serde(default)]
    pub use_cache: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateTokenResponse {
    pub status: TokenStatus,
}

#[derive(Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct LookupTokenRequest {
    pub token: String,
    #[serde(default)]
    pub use_cache: bool,
}

#[derive(Debug, Deserialize)]
pub struct TokensForIdentityQuery {
    #[serde(default)]
    pub namespace: String,
    pub active: Option<bool>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}
