//! Management routes driven through the router with `oneshot`.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value as JsonValue;
use tower::ServiceExt;

use common::{seed, test_app, token_for};
use kindred_api::router;
use kindred_core::{MessageBroker, NotificationRepository};

async fn call(
    app: Router,
    method: Method,
    uri: &str,
    user: Option<&str>,
    body: Option<&str>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_requires_token() {
    let t = test_app().await;
    let app = router(t.state);

    let (status, body) = call(app.clone(), Method::GET, "/api/notifications", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let request = Request::builder()
        .uri("/api/notifications")
        .header(header::AUTHORIZATION, "Bearer garbage")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_returns_only_callers_rows() {
    let t = test_app().await;
    let mine = seed(&t.store, "u1", "t1").await;
    seed(&t.store, "u2", "t1").await;

    let (status, body) = call(
        router(t.state),
        Method::GET,
        "/api/notifications",
        Some("u1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["eventId"], mine.as_str());
    assert_eq!(rows[0]["status"], "UNREAD");
    assert_eq!(rows[0]["treeName"], "Smith family");
}

#[tokio::test]
async fn test_mark_read_and_unread() {
    let t = test_app().await;
    let id = seed(&t.store, "u1", "t1").await;
    let app = router(t.state);
    let read_uri = format!("/api/notifications/{}/read", id);

    let (status, body) = call(app.clone(), Method::POST, &read_uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "updated");
    assert_eq!(body["status"], "READ");

    let (status, body) = call(app.clone(), Method::POST, &read_uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "unchanged");
    assert!(!t.store.find("u1", &id).await.unwrap().unwrap().is_unread());

    let unread_uri = format!("/api/notifications/{}/unread", id);
    let (status, body) = call(app.clone(), Method::POST, &unread_uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "updated");

    // Someone else's row is invisible
    let (status, _) = call(app, Method::POST, &read_uri, Some("u2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_then_not_found() {
    let t = test_app().await;
    let id = seed(&t.store, "u1", "t1").await;
    let app = router(t.state);
    let uri = format!("/api/notifications/{}", id);

    let (status, body) = call(app.clone(), Method::DELETE, &uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, body) = call(app, Method::DELETE, &uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    assert!(t.store.is_empty().await);
}

#[tokio::test]
async fn test_bulk_routes() {
    let t = test_app().await;
    let first = seed(&t.store, "u1", "t1").await;
    seed(&t.store, "u1", "t2").await;
    let app = router(t.state);

    let (status, body) = call(
        app.clone(),
        Method::POST,
        "/api/notifications/read-all",
        Some("u1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let batch = format!(r#"["{}"]"#, first);
    let (status, body) = call(
        app.clone(),
        Method::POST,
        "/api/notifications/unread-batch",
        Some("u1"),
        Some(&batch),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["eventIds"][0], first.as_str());

    let (status, _) = call(
        app.clone(),
        Method::POST,
        "/api/notifications/unread-batch",
        Some("u1"),
        Some("[]"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        app.clone(),
        Method::POST,
        "/api/notifications/unread-batch",
        Some("u1"),
        Some(r#"{"eventIds":"nope"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        app,
        Method::DELETE,
        "/api/notifications/read",
        Some("u1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);
    assert_eq!(t.store.len().await, 1);
}

#[tokio::test]
async fn test_health_reports_queue_depth() {
    let t = test_app().await;
    t.broker
        .publish("tree_events_exchange", "tree.t1.TREE_CREATED", "{}")
        .await
        .unwrap();

    let (status, body) = call(router(t.state), Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue"], "tree_event_queue");
    assert_eq!(body["queueDepth"], 1);
}
