#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use certflow_core::event::{CERT_TOGGLED_PARTITION, CERT_TOGGLED_TOPIC};
use certflow_core::queue::{QueueDatabase, TopicProducer};
use certflow_core::{DeliveryPolicy, ToggleNoopPolicy};
use certflow_service::http::build_router;
use certflow_service::storage::CertDatabase;
use certflow_service::{StateManager, ToggleEmitter};

async fn app() -> axum::Router {
    let db = CertDatabase::open_in_memory().await.unwrap();
    let queue = QueueDatabase::open_in_memory().await.unwrap();
    let producer = TopicProducer::new(queue, CERT_TOGGLED_TOPIC, CERT_TOGGLED_PARTITION);
    let emitter = ToggleEmitter::new(producer, DeliveryPolicy::default());
    build_router(Arc::new(StateManager::new(
        db,
        emitter,
        ToggleNoopPolicy::Reject,
    )))
}

/// Send a request to the app and return (status, JSON body).
async fn send(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_dog(app: &axum::Router) -> String {
    let (status, user) = send(
        app,
        Method::POST,
        "/user",
        Some(json!({ "name": "Dog", "email": "dog@cat.com", "password": "tuna" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    user["uuid"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn add_user_hides_password() {
    let app = app().await;
    let (status, user) = send(
        &app,
        Method::POST,
        "/user",
        Some(json!({ "name": "Dog", "email": "dog@cat.com", "password": "tuna" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["name"], "Dog");
    assert_eq!(user["active"], true);
    assert!(user.get("password").is_none());
    assert!(user.get("password_hash").is_none());
}

#[tokio::test]
async fn get_user_by_query() {
    let app = app().await;
    let uuid = create_dog(&app).await;

    let (status, user) = send(&app, Method::GET, &format!("/user?uuid={uuid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["email"], "dog@cat.com");
}

#[tokio::test]
async fn duplicate_email_is_conflict() {
    let app = app().await;
    create_dog(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/user",
        Some(json!({ "name": "Dog", "email": "dog@cat.com", "password": "tuna" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "duplicate");
}

#[tokio::test]
async fn deleted_user_is_not_found() {
    let app = app().await;
    let uuid = create_dog(&app).await;

    let (status, body) = send(&app, Method::DELETE, &format!("/user?uuid={uuid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(&app, Method::GET, &format!("/user?uuid={uuid}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found_or_inactive");
}

#[tokio::test]
async fn certificate_lifecycle() {
    let app = app().await;
    let user_uuid = create_dog(&app).await;

    let (status, cert) = send(
        &app,
        Method::POST,
        "/cert",
        Some(json!({ "user_uuid": user_uuid, "private_key": "private_key", "body": "cert_body" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cert["active"], true);
    let cert_uuid = cert["uuid"].as_str().unwrap().to_string();

    let uri = format!("/cert?user_uuid={user_uuid}");
    let (status, certs) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(certs.as_array().unwrap().len(), 1);

    let patch = json!({ "uuid": cert_uuid, "user_uuid": user_uuid, "active": false });
    let (status, body) = send(&app, Method::PATCH, "/cert", Some(patch.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "changed": true }));

    let (_, certs) = send(&app, Method::GET, &format!("/cert?user_uuid={user_uuid}"), None).await;
    assert!(certs.as_array().unwrap().is_empty());

    let (status, body) = send(&app, Method::PATCH, "/cert", Some(patch)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "integrity");
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let app = app().await;
    let (status, body) = send(&app, Method::POST, "/cert", Some(json!({ "user_uuid": 7 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn missing_query_is_bad_request() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/cert", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
