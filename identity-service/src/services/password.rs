//! Password credential store: one Argon2 hash per `(namespace, identity)`.
//!
//! The identity is a weak reference; credentials never check it.

use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::gates::Namespaces;
use super::metrics::PASSWORD_AUTHENTICATIONS_TOTAL;
use super::store::CredentialStore;
use super::ServiceError;
use crate::utils::{
    hash_password, validate_password, verify_password, Password, PasswordHashString,
};

#[derive(Clone)]
pub struct PasswordService {
    store: Arc<dyn CredentialStore>,
    namespaces: Namespaces,
}

impl PasswordService {
    pub fn new(store: Arc<dyn CredentialStore>, namespaces: Namespaces) -> Self {
        Self { store, namespaces }
    }

    /// Upsert; `true` only when no credential existed for the key.
    #[instrument(skip(self, password))]
    pub async fn create_or_update(
        &self,
        namespace: &str,
        identity: Uuid,
        password: Password,
    ) -> Result<bool, ServiceError> {
        validate_password(password.as_str())?;
        self.namespaces.require_for_write(namespace).await?;

        let hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| anyhow::anyhow!("Password hashing task failed: {}", e))??;

        let created = self
            .store
            .upsert_password(namespace, identity, hash.as_str())
            .await?;

        info!(created, "Password credential stored");
        Ok(created)
    }

    /// `false` for a wrong password, an absent credential or namespace.
    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        namespace: &str,
        identity: Uuid,
        password: Password,
    ) -> Result<bool, ServiceError> {
        let result = self.check(namespace, identity, password).await?;
        PASSWORD_AUTHENTICATIONS_TOTAL
            .with_label_values(&[result])
            .inc();
        Ok(result == "success")
    }

    async fn check(
        &self,
        namespace: &str,
        identity: Uuid,
        password: Password,
    ) -> Result<&'static str, ServiceError> {
        if validate_password(password.as_str()).is_err() {
            return Ok("failure");
        }
        if !self.namespaces.exists(namespace).await? {
            return Ok("no_credential");
        }
        let Some(credential) = self.store.find_password(namespace, identity).await? else {
            return Ok("no_credential");
        };

        let hash = PasswordHashString::new(credential.password_hash);
        let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| anyhow::anyhow!("Password verification task failed: {}", e))?;

        match verified {
            Ok(true) => Ok("success"),
            Ok(false) => Ok("failure"),
            Err(e) => {
                error!(error = %e, "Stored password hash is unreadable");
                Ok("failure")
            }
        }
    }

    /// `false` if absent or the namespace is missing.
    #[instrument(skip(self))]
    pub async fn exists(&self, namespace: &str, identity: Uuid) -> Result<bool, ServiceError> {
        if !self.namespaces.exists(namespace).await? {
            return Ok(false);
        }
        Ok(self.store.find_password(namespace, identity).await?.is_some())
    }

    /// Idempotent; returns whether a credential existed.
    #[instrument(skip(self))]
    pub async fn delete(&self, namespace: &str, identity: Uuid) -> Result<bool, ServiceError> {
        if !self.namespaces.exists(namespace).await? {
            return Ok(false);
        }

        let existed = self.store.delete_password(namespace, identity).await?;
        if existed {
            info!("Password credential deleted");
        }
        Ok(existed)
    }
}
