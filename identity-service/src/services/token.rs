//! Token lifecycle engine.
//!
//! A token is a persisted record plus two signed strings (access and
//! refresh) naming it. A string is only as good as its record: decoding
//! decides INVALID, the record decides NOT_FOUND / DISABLED / OK.

use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::cache::CachedRecords;
use super::gates::Namespaces;
use super::metrics::{TOKEN_REFRESHES_TOTAL, TOKEN_VALIDATIONS_TOTAL};
use super::signer::{TokenClaims, TokenSigner};
use super::store::TokenStore;
use super::ServiceError;
use crate::models::{
    IssuedToken, Page, RefreshOutcome, RefreshStatus, Scope, TokenData, TokenKind, TokenStatus,
};

const RECORD: &str = "token";

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    namespaces: Namespaces,
    signer: TokenSigner,
    cache: CachedRecords,
}

impl TokenService {
    pub fn new(
        store: Arc<dyn TokenStore>,
        namespaces: Namespaces,
        signer: TokenSigner,
        cache: CachedRecords,
    ) -> Self {
        Self {
            store,
            namespaces,
            signer,
            cache,
        }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Issue a record with its access and refresh strings.
    ///
    /// The identity is not required to exist.
    #[instrument(skip(self, scopes, creation_metadata), fields(scopes = scopes.len()))]
    pub async fn create(
        &self,
        namespace: &str,
        identity: Uuid,
        scopes: Vec<Scope>,
        creation_metadata: String,
    ) -> Result<IssuedToken, ServiceError> {
        self.namespaces.require_for_write(namespace).await?;

        let token_data = TokenData::new(namespace.to_string(), identity, scopes, creation_metadata);
        let token = self.signer.sign(&token_data, TokenKind::Access)?;
        let refresh_token = self.signer.sign(&token_data, TokenKind::Refresh)?;

        self.store.insert_token(&token_data).await?;

        info!(token_id = %token_data.uuid, "Token issued");
        Ok(IssuedToken {
            token_data,
            token,
            refresh_token,
        })
    }

    /// Status of an access or refresh string; the kind does not matter here.
    #[instrument(skip(self, token))]
    pub async fn validate(&self, token: &str, use_cache: bool) -> Result<TokenStatus, ServiceError> {
        let status = match self.decode(token) {
            None => TokenStatus::Invalid,
            Some(claims) => match self.lookup(&claims.ns, claims.tid, use_cache).await? {
                None => TokenStatus::NotFound,
                Some(record) if record.disabled => TokenStatus::Disabled,
                Some(_) => TokenStatus::Ok,
            },
        };

        TOKEN_VALIDATIONS_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();
        debug!(status = status.as_str(), "Token validated");
        Ok(status)
    }

    /// Mint a fresh access string from a refresh string.
    ///
    /// The refresh string stays usable; the record is always read from the
    /// store.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome, ServiceError> {
        let outcome = match self.decode(refresh_token) {
            None => RefreshOutcome::rejected(RefreshStatus::Invalid),
            Some(claims) if claims.kind != TokenKind::Refresh => {
                RefreshOutcome::rejected(RefreshStatus::NotRefreshToken)
            }
            Some(claims) => match self.lookup(&claims.ns, claims.tid, false).await? {
                None => RefreshOutcome::rejected(RefreshStatus::NotFound),
                Some(record) if record.disabled => RefreshOutcome::rejected(RefreshStatus::Disabled),
                Some(record) => RefreshOutcome {
                    status: RefreshStatus::Ok,
                    token: Some(self.signer.sign(&record, TokenKind::Access)?),
                },
            },
        };

        TOKEN_REFRESHES_TOTAL
            .with_label_values(&[outcome.status.as_str()])
            .inc();
        debug!(status = outcome.status.as_str(), "Token refresh handled");
        Ok(outcome)
    }

    /// Disable a record; both of its strings report DISABLED afterwards.
    #[instrument(skip(self))]
    pub async fn disable(&self, namespace: &str, uuid: Uuid) -> Result<(), ServiceError> {
        self.namespaces
            .require_for_read(namespace, ServiceError::token_not_found)
            .await?;

        if !self.store.disable_token(namespace, uuid).await? {
            return Err(ServiceError::token_not_found());
        }
        self.evict(namespace, uuid).await;

        info!("Token disabled");
        Ok(())
    }

    /// Idempotent; returns whether the record existed.
    #[instrument(skip(self))]
    pub async fn delete(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        if !self.namespaces.exists(namespace).await? {
            return Ok(false);
        }

        let existed = self.store.delete_token(namespace, uuid).await?;
        self.evict(namespace, uuid).await;

        if existed {
            info!("Token deleted");
        }
        Ok(existed)
    }

    #[instrument(skip(self))]
    pub async fn get(
        &self,
        namespace: &str,
        uuid: Uuid,
        use_cache: bool,
    ) -> Result<TokenData, ServiceError> {
        self.lookup(namespace, uuid, use_cache)
            .await?
            .ok_or_else(ServiceError::token_not_found)
    }

    /// `get` addressed by a signed string instead of `(namespace, uuid)`.
    #[instrument(skip(self, token))]
    pub async fn raw_get(&self, token: &str, use_cache: bool) -> Result<TokenData, ServiceError> {
        let claims = self
            .decode(token)
            .ok_or_else(|| ServiceError::InvalidArgument("malformed token".to_string()))?;
        self.get(&claims.ns, claims.tid, use_cache).await
    }

    /// Records issued to an identity in creation order; empty for an absent
    /// namespace.
    #[instrument(skip(self))]
    pub async fn list_for_identity(
        &self,
        namespace: &str,
        identity: Uuid,
        active: Option<bool>,
        page: Page,
    ) -> Result<Vec<TokenData>, ServiceError> {
        if !self.namespaces.exists(namespace).await? {
            return Ok(Vec::new());
        }
        self.store
            .list_tokens_for_identity(namespace, identity, active, page)
            .await
    }

    fn decode(&self, token: &str) -> Option<TokenClaims> {
        match self.signer.decode(token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(error = %e, "Token string rejected");
                None
            }
        }
    }

    /// Record lookup behind the namespace read gate. A record whose
    /// namespace is gone reads as absent.
    async fn lookup(
        &self,
        namespace: &str,
        uuid: Uuid,
        use_cache: bool,
    ) -> Result<Option<TokenData>, ServiceError> {
        if !self.namespaces.exists(namespace).await? {
            return Ok(None);
        }

        if !use_cache {
            return self.store.find_token(namespace, uuid).await;
        }

        let key = CachedRecords::token_key(namespace, uuid);
        if let Some(record) = self.cache.fetch::<TokenData>(RECORD, &key).await {
            return Ok(Some(record));
        }

        let record = self.store.find_token(namespace, uuid).await?;
        if let Some(record) = &record {
            self.cache.store(RECORD, &key, record).await;
        }
        Ok(record)
    }

    async fn evict(&self, namespace: &str, uuid: Uuid) {
        self.cache
            .invalidate(RECORD, &CachedRecords::token_key(namespace, uuid))
            .await;
    }
}
