pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::{CacheBackend, IdentityConfig, StoreBackend};
use crate::services::{
    CachedRecords, CredentialStore, IdentityService, IdentityStore, MemoryCache, MemoryStore,
    NamespaceGate, Namespaces, NoopCache, PasswordService, PgStore, PolicyGate, RecordCache,
    RedisCache, ReferenceGates, RegistryClient, RoleGate, StaticRegistry, TokenService,
    TokenSigner, TokenStore,
};

/// The pluggable collaborators the engines are assembled from.
#[derive(Clone)]
pub struct Backends {
    pub identities: Arc<dyn IdentityStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub cache: Arc<dyn RecordCache>,
    pub namespace_gate: Arc<dyn NamespaceGate>,
    pub policy_gate: Arc<dyn PolicyGate>,
    pub role_gate: Arc<dyn RoleGate>,
}

impl Backends {
    /// Everything in-process: DashMap store, memory cache, one static
    /// registry answering all three gates.
    pub fn in_memory(registry: Arc<StaticRegistry>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            identities: store.clone(),
            tokens: store.clone(),
            credentials: store,
            cache: Arc::new(MemoryCache::new()),
            namespace_gate: registry.clone(),
            policy_gate: registry.clone(),
            role_gate: registry,
        }
    }

    pub async fn from_config(config: &IdentityConfig) -> Result<Self, AppError> {
        let (identities, tokens, credentials): (
            Arc<dyn IdentityStore>,
            Arc<dyn TokenStore>,
            Arc<dyn CredentialStore>,
        ) = match (&config.store.backend, &config.store.database) {
            (StoreBackend::Postgres, Some(database)) => {
                let store = Arc::new(
                    PgStore::new(
                        &database.url,
                        database.max_connections,
                        database.min_connections,
                    )
                    .await?,
                );
                store.run_migrations().await?;
                (
                    store.clone() as Arc<dyn IdentityStore>,
                    store.clone() as Arc<dyn TokenStore>,
                    store as Arc<dyn CredentialStore>,
                )
            }
            (StoreBackend::Postgres, None) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required for the postgres store"
                )))
            }
            (StoreBackend::Memory, _) => {
                tracing::warn!("Using in-memory store; records are lost on restart");
                let store = Arc::new(MemoryStore::new());
                (
                    store.clone() as Arc<dyn IdentityStore>,
                    store.clone() as Arc<dyn TokenStore>,
                    store as Arc<dyn CredentialStore>,
                )
            }
        };

        let cache: Arc<dyn RecordCache> = match (&config.cache.backend, &config.cache.redis_url) {
            (CacheBackend::Redis, Some(url)) => {
                Arc::new(RedisCache::new(url).await.map_err(AppError::InternalError)?)
            }
            (CacheBackend::Redis, None) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "REDIS_URL is required for the redis cache"
                )))
            }
            (CacheBackend::Memory, _) => Arc::new(MemoryCache::new()),
            (CacheBackend::None, _) => Arc::new(NoopCache),
        };

        let static_registry = Arc::new(StaticRegistry::with_namespaces(
            config.registry.static_namespaces.iter().cloned(),
        ));

        let namespace_gate: Arc<dyn NamespaceGate> = match &config.registry.namespace_url {
            Some(url) => Arc::new(
                RegistryClient::new(url, config.registry.timeout)
                    .map_err(AppError::ConfigError)?,
            ),
            None => static_registry.clone(),
        };

        let (policy_gate, role_gate): (Arc<dyn PolicyGate>, Arc<dyn RoleGate>) =
            match &config.registry.policy_url {
                Some(url) => {
                    let client = Arc::new(
                        RegistryClient::new(url, config.registry.timeout)
                            .map_err(AppError::ConfigError)?,
                    );
                    (
                        client.clone() as Arc<dyn PolicyGate>,
                        client as Arc<dyn RoleGate>,
                    )
                }
                None => (
                    static_registry.clone() as Arc<dyn PolicyGate>,
                    static_registry as Arc<dyn RoleGate>,
                ),
            };

        Ok(Self {
            identities,
            tokens,
            credentials,
            cache,
            namespace_gate,
            policy_gate,
            role_gate,
        })
    }
}

/// Service identity and admin credentials carried in the state.
#[derive(Clone)]
pub struct Settings {
    pub service_name: String,
    pub service_version: String,
    pub cache_ttl_seconds: u64,
    pub admin_api_key: String,
}

impl Settings {
    pub fn from_config(config: &IdentityConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            service_version: config.service_version.clone(),
            cache_ttl_seconds: config.cache.ttl_seconds,
            admin_api_key: config.security.admin_api_key.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub identities: IdentityService,
    pub tokens: TokenService,
    pub passwords: PasswordService,
    pub settings: Arc<Settings>,
    store_health: Arc<dyn IdentityStore>,
    cache: CachedRecords,
}

impl AppState {
    pub fn new(backends: Backends, signer: TokenSigner, settings: Settings) -> Self {
        let namespaces = Namespaces::new(backends.namespace_gate);
        let references = ReferenceGates::new(backends.policy_gate, backends.role_gate);
        let cache = CachedRecords::new(backends.cache, settings.cache_ttl_seconds);

        Self {
            identities: IdentityService::new(
                backends.identities.clone(),
                namespaces.clone(),
                references,
                cache.clone(),
            ),
            tokens: TokenService::new(backends.tokens, namespaces.clone(), signer, cache.clone()),
            passwords: PasswordService::new(backends.credentials, namespaces),
            settings: Arc::new(settings),
            store_health: backends.identities,
            cache,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/v1/admin/signing-keys",
            post(handlers::admin::rotate_signing_key),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    let identity_routes = Router::new()
        .route(
            "/v1/identities",
            post(handlers::identity::create_identity).get(handlers::identity::list_identities),
        )
        .route(
            "/v1/identities/:id",
            get(handlers::identity::get_identity)
                .patch(handlers::identity::update_identity)
                .delete(handlers::identity::delete_identity),
        )
        .route(
            "/v1/identities/:id/exists",
            get(handlers::identity::identity_exists),
        )
        .route(
            "/v1/identities/:id/active",
            put(handlers::identity::set_identity_active),
        )
        .route(
            "/v1/identities/:id/policies",
            post(handlers::identity::add_policy).delete(handlers::identity::remove_policy),
        )
        .route(
            "/v1/identities/:id/roles",
            post(handlers::identity::add_role).delete(handlers::identity::remove_role),
        )
        .route(
            "/v1/identities/:id/tokens",
            get(handlers::token::tokens_for_identity),
        )
        .route(
            "/v1/service-identities",
            get(handlers::identity::get_service_managed_identity),
        );

    let token_routes = Router::new()
        .route("/v1/tokens", post(handlers::token::create_token))
        .route("/v1/tokens/validate", post(handlers::token::validate_token))
        .route("/v1/tokens/refresh", post(handlers::token::refresh_token))
        .route("/v1/tokens/lookup", post(handlers::token::lookup_token))
        .route(
            "/v1/tokens/:id",
            get(handlers::token::get_token).delete(handlers::token::delete_token),
        )
        .route(
            "/v1/tokens/:id/disable",
            post(handlers::token::disable_token),
        );

    let password_routes = Router::new()
        .route(
            "/v1/passwords",
            put(handlers::password::set_password).delete(handlers::password::delete_password),
        )
        .route(
            "/v1/passwords/authenticate",
            post(handlers::password::authenticate),
        )
        .route(
            "/v1/passwords/exists",
            get(handlers::password::password_exists),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(identity_routes)
        .merge(token_routes)
        .merge(password_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
}

/// Store must answer; a cache outage only degrades reads.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.store_health.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::from(e)
    })?;

    let cache = match state.cache.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!(error = %e, "Cache health check failed");
            "down"
        }
    };

    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": state.settings.service_name,
        "version": state.settings.service_version,
        "checks": {
            "store": "up",
            "cache": cache
        }
    })))
}
