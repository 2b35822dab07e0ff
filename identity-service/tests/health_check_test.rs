mod common;

use axum::http::{Method, StatusCode};
use common::{field, TestApp, TEST_ADMIN_API_KEY};
use identity_service::middleware::ADMIN_API_KEY_HEADER;
use serde_json::json;
use uuid::Uuid;

const NEW_SECRET: &str = "rotated-signing-secret-abcdefghijklmnopqrstu";

#[tokio::test]
async fn test_health_check_reports_backends() {
    // Arrange
    let app = TestApp::new();

    // Act
    let (status, body) = app.get("/health").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "identity-service");
    assert_eq!(body["checks"]["store"], "up");
    assert_eq!(body["checks"]["cache"], "up");
}

#[tokio::test]
async fn test_metrics_exposes_token_counters() {
    let app = TestApp::new();
    app.post("/v1/tokens/validate", json!({ "token": "garbage" }))
        .await;

    let (status, body) = app.call_text(Method::GET, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("identity_token_validations_total"));
}

#[tokio::test]
async fn test_rotation_requires_admin_key() {
    let app = TestApp::new();
    let request = json!({ "kid": "next", "secret": NEW_SECRET });

    let (missing, body) = app
        .call(Method::POST, "/v1/admin/signing-keys", Some(request.clone()), &[])
        .await;
    let (wrong, _) = app
        .call(
            Method::POST,
            "/v1/admin/signing-keys",
            Some(request),
            &[(ADMIN_API_KEY_HEADER, "not-the-key")],
        )
        .await;

    assert_eq!(missing, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
    assert_eq!(wrong, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rotation_keeps_previous_strings_valid_when_retained() {
    // Arrange
    let app = TestApp::new();
    let issued = app.create_token("", &Uuid::new_v4().to_string()).await;
    let old_token = field(&issued, "token").to_string();

    // Act
    let (status, body) = app
        .call(
            Method::POST,
            "/v1/admin/signing-keys",
            Some(json!({ "kid": "next", "secret": NEW_SECRET })),
            &[(ADMIN_API_KEY_HEADER, TEST_ADMIN_API_KEY)],
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_kid"], "next");
    let mut key_ids: Vec<&str> = body["key_ids"]
        .as_array()
        .expect("key ids")
        .iter()
        .filter_map(|kid| kid.as_str())
        .collect();
    key_ids.sort_unstable();
    assert_eq!(key_ids, vec!["next", "test"]);

    let (_, old) = app
        .post("/v1/tokens/validate", json!({ "token": old_token }))
        .await;
    assert_eq!(old["status"], "OK");

    let fresh = app.create_token("", &Uuid::new_v4().to_string()).await;
    let (_, new) = app
        .post("/v1/tokens/validate", json!({ "token": field(&fresh, "token") }))
        .await;
    assert_eq!(new["status"], "OK");
}

#[tokio::test]
async fn test_rotation_without_retention_invalidates_old_strings() {
    let app = TestApp::new();
    let issued = app.create_token("", &Uuid::new_v4().to_string()).await;

    let (status, _) = app
        .call(
            Method::POST,
            "/v1/admin/signing-keys",
            Some(json!({ "kid": "next", "secret": NEW_SECRET, "retain_previous": false })),
            &[(ADMIN_API_KEY_HEADER, TEST_ADMIN_API_KEY)],
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, old) = app
        .post("/v1/tokens/validate", json!({ "token": field(&issued, "token") }))
        .await;
    assert_eq!(old["status"], "INVALID");
}

#[tokio::test]
async fn test_rotation_rejects_short_secret() {
    let app = TestApp::new();

    let (status, body) = app
        .call(
            Method::POST,
            "/v1/admin/signing-keys",
            Some(json!({ "kid": "next", "secret": "short" })),
            &[(ADMIN_API_KEY_HEADER, TEST_ADMIN_API_KEY)],
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");
}
