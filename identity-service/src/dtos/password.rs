use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Password bodies are deliberately not `Debug`.
#[derive(Deserialize)]
pub struct SetPasswordRequest {
    #[serde(default)]
    pub namespace: String,
    pub identity: Uuid,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetPasswordResponse {
    pub created: bool,
}

#[derive(Deserialize)]
pub struct AuthenticateRequest {
    #[serde(default)]
    pub namespace: String,
    pub identity: Uuid,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthenticateResponse {
    pub authenticated: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordQuery {
    #[serde(default)]
    pub namespace: String,
    pub identity: Uuid,
}
