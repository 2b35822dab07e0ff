//! PostgreSQL store for identity-service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{CredentialStore, IdentityStore, TokenStore};
use crate::models::{
    Identity, Managed, MembershipKind, Page, PasswordCredential, ResourceRef, Scope, TokenData,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::ServiceError;

const IDENTITY_COLUMNS: &str = "identity_id, namespace, name, active, managed_kind, \
     managed_service, managed_reason, managed_id, managed_ref_namespace, managed_ref_uuid, \
     version, created_utc, updated_utc";

const TOKEN_COLUMNS: &str =
    "token_id, namespace, identity_id, scopes, creation_metadata, disabled, created_utc";

#[derive(FromRow)]
struct IdentityRow {
    identity_id: Uuid,
    namespace: String,
    name: String,
    active: bool,
    managed_kind: String,
    managed_service: Option<String>,
    managed_reason: Option<String>,
    managed_id: Option<String>,
    managed_ref_namespace: Option<String>,
    managed_ref_uuid: Option<Uuid>,
    version: i64,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

#[derive(FromRow)]
struct MembershipRow {
    identity_id: Uuid,
    member_kind: String,
    ref_namespace: String,
    ref_uuid: Uuid,
}

impl IdentityRow {
    fn managed(&self) -> Result<Managed, ServiceError> {
        let corrupt = || {
            ServiceError::Internal(anyhow::anyhow!(
                "Identity {} has inconsistent managed columns",
                self.identity_id
            ))
        };

        match self.managed_kind.as_str() {
            "unmanaged" => Ok(Managed::Unmanaged),
            "service" => Ok(Managed::ServiceManaged {
                service: self.managed_service.clone().ok_or_else(corrupt)?,
                reason: self.managed_reason.clone().unwrap_or_default(),
                management_id: self.managed_id.clone().ok_or_else(corrupt)?,
            }),
            "identity" => Ok(Managed::IdentityManaged {
                ref_namespace: self.managed_ref_namespace.clone().ok_or_else(corrupt)?,
                ref_uuid: self.managed_ref_uuid.ok_or_else(corrupt)?,
            }),
            _ => Err(corrupt()),
        }
    }

    fn into_identity(self, memberships: &[MembershipRow]) -> Result<Identity, ServiceError> {
        let managed = self.managed()?;
        let mut policies = BTreeSet::new();
        let mut roles = BTreeSet::new();
        for row in memberships {
            let reference = ResourceRef::new(row.ref_namespace.clone(), row.ref_uuid);
            match row.member_kind.as_str() {
                "policy" => policies.insert(reference),
                "role" => roles.insert(reference),
                other => {
                    return Err(ServiceError::Internal(anyhow::anyhow!(
                        "Unknown membership kind '{}'",
                        other
                    )))
                }
            };
        }

        Ok(Identity {
            uuid: self.identity_id,
            namespace: self.namespace,
            name: self.name,
            active: self.active,
            managed,
            policies,
            roles,
            version: self.version,
            created_utc: self.created_utc,
            updated_utc: self.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct TokenRow {
    token_id: Uuid,
    namespace: String,
    identity_id: Uuid,
    scopes: Json<Vec<Scope>>,
    creation_metadata: String,
    disabled: bool,
    created_utc: DateTime<Utc>,
}

impl From<TokenRow> for TokenData {
    fn from(row: TokenRow) -> Self {
        TokenData {
            uuid: row.token_id,
            namespace: row.namespace,
            identity: row.identity_id,
            scopes: row.scopes.0,
            creation_metadata: row.creation_metadata,
            disabled: row.disabled,
            created_utc: row.created_utc,
        }
    }
}

/// Database connection pool wrapper implementing all three stores.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "identity-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, ServiceError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), ServiceError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
        info!("Database migrations completed");
        Ok(())
    }
}

async fn load_identity(
    conn: &mut PgConnection,
    namespace: &str,
    uuid: Uuid,
) -> Result<Option<Identity>, ServiceError> {
    let row = sqlx::query_as::<_, IdentityRow>(&format!(
        "SELECT {} FROM identities WHERE namespace = $1 AND identity_id = $2",
        IDENTITY_COLUMNS
    ))
    .bind(namespace)
    .bind(uuid)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let memberships = sqlx::query_as::<_, MembershipRow>(
        r#"
        SELECT identity_id, member_kind, ref_namespace, ref_uuid
        FROM identity_memberships
        WHERE namespace = $1 AND identity_id = $2
        "#,
    )
    .bind(namespace)
    .bind(uuid)
    .fetch_all(&mut *conn)
    .await?;

    row.into_identity(&memberships).map(Some)
}

/// Lock the identity row for the rest of the transaction. `false` if absent.
async fn lock_identity(
    conn: &mut PgConnection,
    namespace: &str,
    uuid: Uuid,
) -> Result<bool, ServiceError> {
    let locked: Option<(i64,)> = sqlx::query_as(
        "SELECT version FROM identities WHERE namespace = $1 AND identity_id = $2 FOR UPDATE",
    )
    .bind(namespace)
    .bind(uuid)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(locked.is_some())
}

async fn bump_version(
    conn: &mut PgConnection,
    namespace: &str,
    uuid: Uuid,
) -> Result<(), ServiceError> {
    sqlx::query(
        r#"
        UPDATE identities
        SET version = version + 1, updated_utc = NOW()
        WHERE namespace = $1 AND identity_id = $2
        "#,
    )
    .bind(namespace)
    .bind(uuid)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl IdentityStore for PgStore {
    #[instrument(skip(self, identity), fields(namespace = %identity.namespace, identity_id = %identity.uuid))]
    async fn insert_identity(&self, identity: &Identity) -> Result<(), ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_identity"])
            .start_timer();

        let (service, reason, management_id, ref_namespace, ref_uuid) = match &identity.managed {
            Managed::Unmanaged => (None, None, None, None, None),
            Managed::ServiceManaged {
                service,
                reason,
                management_id,
            } => (Some(service), Some(reason), Some(management_id), None, None),
            Managed::IdentityManaged {
                ref_namespace,
                ref_uuid,
            } => (None, None, None, Some(ref_namespace), Some(*ref_uuid)),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO identities (
                identity_id, namespace, name, active, managed_kind,
                managed_service, managed_reason, managed_id,
                managed_ref_namespace, managed_ref_uuid,
                version, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(identity.uuid)
        .bind(&identity.namespace)
        .bind(&identity.name)
        .bind(identity.active)
        .bind(identity.managed.as_str())
        .bind(service)
        .bind(reason)
        .bind(management_id)
        .bind(ref_namespace)
        .bind(ref_uuid)
        .bind(identity.version)
        .bind(identity.created_utc)
        .bind(identity.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                ServiceError::AlreadyExists(match identity.managed.service_key() {
                    Some((service, management_id)) => format!(
                        "Identity managed by '{}' with management id '{}'",
                        service, management_id
                    ),
                    None => format!("Identity {}", identity.uuid),
                })
            }
            other => ServiceError::Database(other),
        })?;

        for kind in [MembershipKind::Policy, MembershipKind::Role] {
            for reference in identity.memberships(kind) {
                sqlx::query(
                    r#"
                    INSERT INTO identity_memberships (namespace, identity_id, member_kind, ref_namespace, ref_uuid)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(&identity.namespace)
                .bind(identity.uuid)
                .bind(kind.as_str())
                .bind(&reference.namespace)
                .bind(reference.uuid)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        timer.observe_duration();

        info!(managed = identity.managed.as_str(), "Identity created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_identity(
        &self,
        namespace: &str,
        uuid: Uuid,
    ) -> Result<Option<Identity>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_identity"])
            .start_timer();

        let mut conn = self.pool.acquire().await?;
        let identity = load_identity(&mut conn, namespace, uuid).await?;

        timer.observe_duration();
        Ok(identity)
    }

    #[instrument(skip(self))]
    async fn find_service_managed(
        &self,
        namespace: &str,
        service: &str,
        management_id: &str,
    ) -> Result<Option<Identity>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_service_managed"])
            .start_timer();

        let mut conn = self.pool.acquire().await?;
        let uuid: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT identity_id FROM identities
            WHERE namespace = $1 AND managed_kind = 'service'
              AND managed_service = $2 AND managed_id = $3
            "#,
        )
        .bind(namespace)
        .bind(service)
        .bind(management_id)
        .fetch_optional(&mut *conn)
        .await?;

        let identity = match uuid {
            Some((uuid,)) => load_identity(&mut conn, namespace, uuid).await?,
            None => None,
        };

        timer.observe_duration();
        Ok(identity)
    }

    #[instrument(skip(self))]
    async fn list_identities(
        &self,
        namespace: &str,
        page: Page,
    ) -> Result<Vec<Identity>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_identities"])
            .start_timer();

        let rows = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM identities WHERE namespace = $1 ORDER BY seq OFFSET $2 LIMIT $3",
            IDENTITY_COLUMNS
        ))
        .bind(namespace)
        .bind(page.skip as i64)
        .bind(page.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.identity_id).collect();
        let memberships = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT identity_id, member_kind, ref_namespace, ref_uuid
            FROM identity_memberships
            WHERE namespace = $1 AND identity_id = ANY($2)
            "#,
        )
        .bind(namespace)
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<MembershipRow>> = HashMap::new();
        for membership in memberships {
            grouped
                .entry(membership.identity_id)
                .or_default()
                .push(membership);
        }

        let identities = rows
            .into_iter()
            .map(|row| {
                let memberships = grouped.remove(&row.identity_id).unwrap_or_default();
                row.into_identity(&memberships)
            })
            .collect::<Result<Vec<_>, _>>()?;

        timer.observe_duration();
        Ok(identities)
    }

    #[instrument(skip(self))]
    async fn update_name(
        &self,
        namespace: &str,
        uuid: Uuid,
        name: &str,
    ) -> Result<Option<Identity>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_name"])
            .start_timer();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE identities
            SET name = $3, version = version + 1, updated_utc = NOW()
            WHERE namespace = $1 AND identity_id = $2 AND name <> $3
            "#,
        )
        .bind(namespace)
        .bind(uuid)
        .bind(name)
        .execute(&mut *tx)
        .await?;
        let identity = load_identity(&mut tx, namespace, uuid).await?;
        tx.commit().await?;

        timer.observe_duration();
        Ok(identity)
    }

    #[instrument(skip(self))]
    async fn set_active(
        &self,
        namespace: &str,
        uuid: Uuid,
        active: bool,
    ) -> Result<Option<Identity>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_active"])
            .start_timer();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE identities
            SET active = $3, version = version + 1, updated_utc = NOW()
            WHERE namespace = $1 AND identity_id = $2 AND active <> $3
            "#,
        )
        .bind(namespace)
        .bind(uuid)
        .bind(active)
        .execute(&mut *tx)
        .await?;
        let identity = load_identity(&mut tx, namespace, uuid).await?;
        tx.commit().await?;

        timer.observe_duration();
        Ok(identity)
    }

    #[instrument(skip(self), fields(kind = kind.as_str()))]
    async fn add_membership(
        &self,
        kind: MembershipKind,
        namespace: &str,
        uuid: Uuid,
        reference: &ResourceRef,
    ) -> Result<Option<Identity>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_membership"])
            .start_timer();

        let mut tx = self.pool.begin().await?;
        if !lock_identity(&mut tx, namespace, uuid).await? {
            return Ok(None);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO identity_memberships (namespace, identity_id, member_kind, ref_namespace, ref_uuid)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(namespace)
        .bind(uuid)
        .bind(kind.as_str())
        .bind(&reference.namespace)
        .bind(reference.uuid)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            bump_version(&mut tx, namespace, uuid).await?;
        }
        let identity = load_identity(&mut tx, namespace, uuid).await?;
        tx.commit().await?;

        timer.observe_duration();
        Ok(identity)
    }

    #[instrument(skip(self), fields(kind = kind.as_str()))]
    async fn remove_membership(
        &self,
        kind: MembershipKind,
        namespace: &str,
        uuid: Uuid,
        reference: &ResourceRef,
    ) -> Result<Option<Identity>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["remove_membership"])
            .start_timer();

        let mut tx = self.pool.begin().await?;
        if !lock_identity(&mut tx, namespace, uuid).await? {
            return Ok(None);
        }

        let removed = sqlx::query(
            r#"
            DELETE FROM identity_memberships
            WHERE namespace = $1 AND identity_id = $2 AND member_kind = $3
              AND ref_namespace = $4 AND ref_uuid = $5
            "#,
        )
        .bind(namespace)
        .bind(uuid)
        .bind(kind.as_str())
        .bind(&reference.namespace)
        .bind(reference.uuid)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed > 0 {
            bump_version(&mut tx, namespace, uuid).await?;
        }
        let identity = load_identity(&mut tx, namespace, uuid).await?;
        tx.commit().await?;

        timer.observe_duration();
        Ok(identity)
    }

    #[instrument(skip(self))]
    async fn delete_identity(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_identity"])
            .start_timer();

        let deleted = sqlx::query("DELETE FROM identities WHERE namespace = $1 AND identity_id = $2")
            .bind(namespace)
            .bind(uuid)
            .execute(&self.pool)
            .await?
            .rows_affected();

        timer.observe_duration();
        Ok(deleted > 0)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgStore {
    #[instrument(skip(self, token), fields(namespace = %token.namespace, token_id = %token.uuid))]
    async fn insert_token(&self, token: &TokenData) -> Result<(), ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_token"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO tokens (token_id, namespace, identity_id, scopes, creation_metadata, disabled, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(token.uuid)
        .bind(&token.namespace)
        .bind(token.identity)
        .bind(Json(&token.scopes))
        .bind(&token.creation_metadata)
        .bind(token.disabled)
        .bind(token.created_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_token(
        &self,
        namespace: &str,
        uuid: Uuid,
    ) -> Result<Option<TokenData>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_token"])
            .start_timer();

        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {} FROM tokens WHERE namespace = $1 AND token_id = $2",
            TOKEN_COLUMNS
        ))
        .bind(namespace)
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(row.map(TokenData::from))
    }

    #[instrument(skip(self))]
    async fn list_tokens_for_identity(
        &self,
        namespace: &str,
        identity: Uuid,
        active: Option<bool>,
        page: Page,
    ) -> Result<Vec<TokenData>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_tokens"])
            .start_timer();

        // active = true keeps rows with disabled = false and vice versa.
        let rows = sqlx::query_as::<_, TokenRow>(&format!(
            r#"
            SELECT {} FROM tokens
            WHERE namespace = $1 AND identity_id = $2
              AND ($3::BOOLEAN IS NULL OR disabled <> $3)
            ORDER BY seq
            OFFSET $4 LIMIT $5
            "#,
            TOKEN_COLUMNS
        ))
        .bind(namespace)
        .bind(identity)
        .bind(active)
        .bind(page.skip as i64)
        .bind(page.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(rows.into_iter().map(TokenData::from).collect())
    }

    #[instrument(skip(self))]
    async fn disable_token(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["disable_token"])
            .start_timer();

        let updated =
            sqlx::query("UPDATE tokens SET disabled = TRUE WHERE namespace = $1 AND token_id = $2")
                .bind(namespace)
                .bind(uuid)
                .execute(&self.pool)
                .await?
                .rows_affected();

        timer.observe_duration();
        Ok(updated > 0)
    }

    #[instrument(skip(self))]
    async fn delete_token(&self, namespace: &str, uuid: Uuid) -> Result<bool, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_token"])
            .start_timer();

        let deleted = sqlx::query("DELETE FROM tokens WHERE namespace = $1 AND token_id = $2")
            .bind(namespace)
            .bind(uuid)
            .execute(&self.pool)
            .await?
            .rows_affected();

        timer.observe_duration();
        Ok(deleted > 0)
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    #[instrument(skip(self, password_hash))]
    async fn upsert_password(
        &self,
        namespace: &str,
        identity: Uuid,
        password_hash: &str,
    ) -> Result<bool, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_password"])
            .start_timer();

        // xmax is zero only for a freshly inserted tuple.
        let (created,): (bool,) = sqlx::query_as(
            r#"
            INSERT INTO password_credentials (namespace, identity_id, password_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (namespace, identity_id)
            DO UPDATE SET password_hash = EXCLUDED.password_hash, updated_utc = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(namespace)
        .bind(identity)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn find_password(
        &self,
        namespace: &str,
        identity: Uuid,
    ) -> Result<Option<PasswordCredential>, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_password"])
            .start_timer();

        let credential = sqlx::query_as::<_, PasswordCredential>(
            r#"
            SELECT namespace, identity_id, password_hash, created_utc, updated_utc
            FROM password_credentials
            WHERE namespace = $1 AND identity_id = $2
            "#,
        )
        .bind(namespace)
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(credential)
    }

    #[instrument(skip(self))]
    async fn delete_password(&self, namespace: &str, identity: Uuid) -> Result<bool, ServiceError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_password"])
            .start_timer();

        let deleted = sqlx::query(
            "DELETE FROM password_credentials WHERE namespace = $1 AND identity_id = $2",
        )
        .bind(namespace)
        .bind(identity)
        .execute(&self.pool)
        .await?
        .rows_affected();

        timer.observe_duration();
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str) -> IdentityRow {
        IdentityRow {
            identity_id: Uuid::new_v4(),
            namespace: "acme".into(),
            name: "svc".into(),
            active: true,
            managed_kind: kind.into(),
            managed_service: None,
            managed_reason: None,
            managed_id: None,
            managed_ref_namespace: None,
            managed_ref_uuid: None,
            version: 3,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn test_row_maps_memberships_by_kind() {
        let row = row("unmanaged");
        let id = row.identity_id;
        let policy = Uuid::new_v4();
        let role = Uuid::new_v4();
        let memberships = vec![
            MembershipRow {
                identity_id: id,
                member_kind: "policy".into(),
                ref_namespace: "".into(),
                ref_uuid: policy,
            },
            MembershipRow {
                identity_id: id,
                member_kind: "role".into(),
                ref_namespace: "acme".into(),
                ref_uuid: role,
            },
        ];

        let identity = row.into_identity(&memberships).unwrap();
        assert!(identity.policies.contains(&ResourceRef::new("", policy)));
        assert!(identity.roles.contains(&ResourceRef::new("acme", role)));
        assert_eq!(identity.version, 3);
    }

    #[test]
    fn test_row_rejects_inconsistent_managed_columns() {
        assert!(row("service").into_identity(&[]).is_err());
        assert!(row("mystery").into_identity(&[]).is_err());

        let mut service = row("service");
        service.managed_service = Some("fleet".into());
        service.managed_id = Some("dev-1".into());
        let identity = service.into_identity(&[]).unwrap();
        assert_eq!(identity.managed.service_key(), Some(("fleet", "dev-1")));
    }

    // Requires a running PostgreSQL; run with DATABASE_URL set and --ignored.
    #[tokio::test]
    #[ignore]
    async fn test_postgres_membership_and_upsert() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let store = PgStore::new(&url, 2, 1).await.unwrap();
        store.run_migrations().await.unwrap();

        let identity = Identity::new("pg-test".into(), "svc".into(), true, Managed::Unmanaged);
        store.insert_identity(&identity).await.unwrap();

        let policy = ResourceRef::new("", Uuid::new_v4());
        let first = store
            .add_membership(MembershipKind::Policy, "pg-test", identity.uuid, &policy)
            .await
            .unwrap()
            .unwrap();
        let second = store
            .add_membership(MembershipKind::Policy, "pg-test", identity.uuid, &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.version, 2);
        assert_eq!(second.version, 2);
        assert_eq!(second.policies.len(), 1);

        let password_owner = Uuid::new_v4();
        assert!(store.upsert_password("pg-test", password_owner, "h1").await.unwrap());
        assert!(!store.upsert_password("pg-test", password_owner, "h2").await.unwrap());

        assert!(store.delete_identity("pg-test", identity.uuid).await.unwrap());
        assert!(store.delete_password("pg-test", password_owner).await.unwrap());
    }
}
