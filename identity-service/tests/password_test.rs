mod common;

use axum::http::StatusCode;
use common::{TestApp, TEST_NAMESPACE};
use serde_json::json;
use uuid::Uuid;

async fn set_password(app: &TestApp, namespace: &str, identity: Uuid, password: &str) -> bool {
    let (status, body) = app
        .put(
            "/v1/passwords",
            json!({ "namespace": namespace, "identity": identity, "password": password }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "set password: {}", body);
    body["created"].as_bool().expect("created flag")
}

async fn authenticate(app: &TestApp, namespace: &str, identity: Uuid, password: &str) -> bool {
    let (status, body) = app
        .post(
            "/v1/passwords/authenticate",
            json!({ "namespace": namespace, "identity": identity, "password": password }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    body["authenticated"].as_bool().expect("authenticated flag")
}

#[tokio::test]
async fn test_password_replacement() {
    // Arrange
    let app = TestApp::new();
    let identity = Uuid::new_v4();

    // Act / Assert
    assert!(set_password(&app, TEST_NAMESPACE, identity, "pw1").await);
    assert!(authenticate(&app, TEST_NAMESPACE, identity, "pw1").await);

    assert!(!set_password(&app, TEST_NAMESPACE, identity, "pw2").await);
    assert!(!authenticate(&app, TEST_NAMESPACE, identity, "pw1").await);
    assert!(authenticate(&app, TEST_NAMESPACE, identity, "pw2").await);
}

#[tokio::test]
async fn test_set_password_in_missing_namespace_fails() {
    let app = TestApp::new();

    let (status, body) = app
        .put(
            "/v1/passwords",
            json!({ "namespace": "globex", "identity": Uuid::new_v4(), "password": "pw1" }),
        )
        .await;

    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], "FAILED_PRECONDITION");
}

#[tokio::test]
async fn test_empty_password_is_rejected_on_write_only() {
    let app = TestApp::new();
    let identity = Uuid::new_v4();

    let (status, _) = app
        .put(
            "/v1/passwords",
            json!({ "namespace": "", "identity": identity, "password": "" }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!authenticate(&app, "", identity, "").await);
}

#[tokio::test]
async fn test_authenticate_never_errors_on_absence() {
    let app = TestApp::new();
    let identity = Uuid::new_v4();

    assert!(!authenticate(&app, TEST_NAMESPACE, identity, "pw1").await);
    assert!(!authenticate(&app, "globex", identity, "pw1").await);
}

#[tokio::test]
async fn test_exists_and_delete() {
    // Arrange
    let app = TestApp::new();
    let identity = Uuid::new_v4();
    let uri = format!("/v1/passwords?namespace={}&identity={}", TEST_NAMESPACE, identity);
    let exists_uri = format!(
        "/v1/passwords/exists?namespace={}&identity={}",
        TEST_NAMESPACE, identity
    );
    set_password(&app, TEST_NAMESPACE, identity, "pw1").await;

    // Act
    let (_, before) = app.get(&exists_uri).await;
    let (_, first) = app.delete(&uri, None).await;
    let (_, second) = app.delete(&uri, None).await;
    let (_, after) = app.get(&exists_uri).await;

    // Assert
    assert_eq!(before["exists"], true);
    assert_eq!(first["existed"], true);
    assert_eq!(second["existed"], false);
    assert_eq!(after["exists"], false);
    assert!(!authenticate(&app, TEST_NAMESPACE, identity, "pw1").await);
}

#[tokio::test]
async fn test_credentials_do_not_require_an_identity_record() {
    let app = TestApp::new();
    let identity = Uuid::new_v4();

    assert!(set_password(&app, "", identity, "pw1").await);

    let (status, _) = app.get(&format!("/v1/identities/{}", identity)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(authenticate(&app, "", identity, "pw1").await);
}
