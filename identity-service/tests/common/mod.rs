//! Shared helpers for identity-service integration tests.
//!
//! Every test gets its own in-memory backends, so tests run in parallel
//! without sharing state. Requests go through the full router via `oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use identity_service::{
    build_router,
    services::{MemoryCache, MemoryStore, StaticRegistry, TokenSigner},
    AppState, Backends, Settings,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_ADMIN_API_KEY: &str = "test-admin-api-key";
pub const TEST_SIGNING_SECRET: &str = "integration-test-signing-secret-0123456789";
pub const TEST_NAMESPACE: &str = "acme";

pub struct TestApp {
    pub router: Router,
    pub registry: Arc<StaticRegistry>,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        let registry = Arc::new(StaticRegistry::with_namespaces([TEST_NAMESPACE]));
        let store = Arc::new(MemoryStore::new());

        let backends = Backends {
            identities: store.clone(),
            tokens: store.clone(),
            credentials: store.clone(),
            cache: Arc::new(MemoryCache::new()),
            namespace_gate: registry.clone(),
            policy_gate: registry.clone(),
            role_gate: registry.clone(),
        };

        let signer = TokenSigner::from_secret("test", TEST_SIGNING_SECRET.as_bytes(), 15, 30)
            .expect("test signer");

        let settings = Settings {
            service_name: "identity-service".to_string(),
            service_version: "test".to_string(),
            cache_ttl_seconds: 60,
            admin_api_key: TEST_ADMIN_API_KEY.to_string(),
        };

        let state = AppState::new(backends, signer, settings);
        let router = build_router(state.clone());

        Self {
            router,
            registry,
            store,
            state,
        }
    }

    /// Send a request and decode the body as JSON (`Null` when empty).
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let (status, bytes) = self.send(method, uri, body, headers).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body is JSON")
        };
        (status, json)
    }

    /// Send a request and return the raw body as text.
    pub async fn call_text(&self, method: Method, uri: &str) -> (StatusCode, String) {
        let (status, bytes) = self.send(method, uri, None, &[]).await;
        (
            status,
            String::from_utf8(bytes).expect("response body is UTF-8"),
        )
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None, &[]).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(body), &[]).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::PUT, uri, Some(body), &[]).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::PATCH, uri, Some(body), &[]).await
    }

    pub async fn delete(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call(Method::DELETE, uri, body, &[]).await
    }

    /// Create an unmanaged identity and return its JSON.
    pub async fn create_identity(&self, namespace: &str, name: &str) -> Value {
        let (status, body) = self
            .post(
                "/v1/identities",
                serde_json::json!({ "namespace": namespace, "name": name }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create identity: {}", body);
        body
    }

    /// Issue a token pair for `identity` and return the `IssuedToken` JSON.
    pub async fn create_token(&self, namespace: &str, identity: &str) -> Value {
        let (status, body) = self
            .post(
                "/v1/tokens",
                serde_json::json!({
                    "namespace": namespace,
                    "identity": identity,
                    "scopes": [{ "namespace": namespace, "resources": ["*"], "actions": ["read"] }],
                    "metadata": "integration test"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create token: {}", body);
        body
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("readable body")
            .to_bytes()
            .to_vec();
        (status, bytes)
    }
}

/// Extract a string field from a JSON value.
pub fn field<'a>(value: &'a Value, name: &str) -> &'a str {
    value[name]
        .as_str()
        .unwrap_or_else(|| panic!("missing string field {}", name))
}
