use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Deserialize, Validate)]
pub struct RotateSigningKeyRequest {
    #[validate(length(min = 1, max = 64, message = "Key id must be 1-64 characters"))]
    pub kid: String,

    /// HMAC secret; the signer enforces the minimum length.
    pub secret: String,

    /// Keep verifying strings signed with the previous keys.
    #[serde(default = "default_retain")]
    pub retain_previous: bool,
}

fn default_retain() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RotateSigningKeyResponse {
    pub active_kid: String,
    pub key_ids: Vec<String>,
}
