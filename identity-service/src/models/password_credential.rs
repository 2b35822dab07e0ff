use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Hashed password keyed by `(namespace, identity)`.
///
/// `identity` is a weak reference: the credential does not require an
/// identity record to exist.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordCredential {
    pub namespace: String,
    #[sqlx(rename = "identity_id")]
    pub identity: Uuid,
    pub password_hash: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl PasswordCredential {
    pub fn new(namespace: String, identity: Uuid, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            namespace,
            identity,
            password_hash,
            created_utc: now,
            updated_utc: now,
        }
    }
}
