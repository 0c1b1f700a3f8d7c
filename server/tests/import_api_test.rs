//! Integration tests for the import API.
//!
//! The router runs in-process against a `MemoryStore`.

use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use importer_engine::{Capabilities, MemoryStore, Record, Verb};
use importer_server::{build_router, AppState, Config};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const DOCUMENT: &str = "id,title\n1,New\n2,X\n3,Y\n";

fn seeded_store(caps: Capabilities) -> Arc<MemoryStore> {
    let existing = [2, 3]
        .into_iter()
        .map(|id| Record::try_from(json!({"id": id, "title": format!("old {}", id)})).unwrap());
    Arc::new(
        MemoryStore::new()
            .with_capabilities(caps)
            .with_records("posts", existing),
    )
}

fn state(store: Arc<MemoryStore>, vars: &[(&str, &str)]) -> AppState {
    let mut vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    vars.insert("STORE_URL".into(), "http://store.invalid".into());
    let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
    AppState::new(store, config)
}

fn app(store: Arc<MemoryStore>, vars: &[(&str, &str)]) -> Router {
    build_router(state(store, vars))
}

async fn send(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn start(app: &Router, document: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/resources/posts/imports",
        Body::from(document.to_string()),
    )
    .await
}

async fn answer(app: &Router, id: &str, kind: &str, value: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        &format!("/imports/{}/{}", id, kind),
        Body::from(json!({ kind: value }).to_string()),
    )
    .await
}

fn session_id(body: &Value) -> String {
    body["sessionId"].as_str().expect("session id").to_string()
}

#[tokio::test]
async fn test_health() {
    let app = app(seeded_store(Capabilities::all()), &[]);
    let (status, body) = send(&app, Method::GET, "/health", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["openImports"], 0);
}

#[tokio::test]
async fn test_collisions_ask_for_strategy() {
    let store = seeded_store(Capabilities::all());
    let app = app(store.clone(), &[]);

    let (status, body) = start(&app, DOCUMENT).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"]["kind"], "chooseStrategy");
    assert_eq!(body["step"]["conflicts"], json!([2, 3]));
    assert_eq!(body["step"]["created"], 1);
    assert_eq!(store.calls_to(Verb::CreateMany).len(), 1);

    let (_, listed) = send(&app, Method::GET, "/imports", Body::empty()).await;
    assert_eq!(listed["imports"][0]["id"], body["sessionId"]);
    assert_eq!(listed["imports"][0]["state"], "awaitingStrategy");
}

#[tokio::test]
async fn test_import_without_collisions_finishes() {
    let app = app(seeded_store(Capabilities::all()), &[]);

    let (status, body) = start(&app, "id,title\n7,a\n8,b\n").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("sessionId").is_none());
    assert_eq!(body["step"]["kind"], "finished");
    let (_, listed) = send(&app, Method::GET, "/imports", Body::empty()).await;
    assert_eq!(listed["imports"], json!([]));
}

#[tokio::test]
async fn test_per_item_flow() {
    let store = seeded_store(Capabilities::none());
    let app = app(store.clone(), &[]);

    let (_, body) = start(&app, DOCUMENT).await;
    let id = session_id(&body);

    let (status, body) = answer(&app, &id, "strategy", "decidePerItem").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"]["kind"], "decide");
    assert_eq!(body["step"]["record"]["id"], "3");
    assert_eq!(body["step"]["remaining"], 2);

    let (_, body) = answer(&app, &id, "decision", "replace").await;
    assert_eq!(body["step"]["record"]["id"], "2");

    let (status, body) = answer(&app, &id, "decision", "skip").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"]["kind"], "finished");
    assert_eq!(body["step"]["skipped"], 1);
    assert!(body.get("sessionId").is_none());

    let (status, _) = answer(&app, &id, "decision", "skip").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(store.calls_to(Verb::Update).len(), 1);
}

#[tokio::test]
async fn test_cancel() {
    let app = app(seeded_store(Capabilities::all()), &[]);

    let (_, body) = start(&app, DOCUMENT).await;
    let id = session_id(&body);

    let (status, body) = send(&app, Method::DELETE, &format!("/imports/{}", id), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"]["cancelled"], true);
    assert_eq!(body["step"]["skipped"], 2);
}

#[tokio::test]
async fn test_refused_inputs_keep_session() {
    let app = app(seeded_store(Capabilities::all()), &[("DISABLE_REPLACE", "true")]);

    let (_, body) = start(&app, DOCUMENT).await;
    let id = session_id(&body);
    assert_eq!(body["step"]["replaceEnabled"], false);

    let (status, body) = answer(&app, &id, "strategy", "replaceAll").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("replace"));

    let (status, _) = answer(&app, &id, "decision", "skip").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = answer(&app, &id, "strategy", "skipAll").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"]["kind"], "finished");
}

#[tokio::test]
async fn test_partial_failure_reports_details() {
    let store = seeded_store(Capabilities::none());
    store.reject_when("title", json!("Y"));
    let app = app(store, &[]);

    let (_, body) = start(&app, DOCUMENT).await;
    let id = session_id(&body);

    let (status, body) = answer(&app, &id, "strategy", "replaceAll").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "1 of 3 commits failed");
    assert_eq!(body["details"][0]["record"]["id"], "3");
    assert_eq!(body["details"][0]["error"]["kind"], "rejected");

    let (_, listed) = send(&app, Method::GET, "/imports", Body::empty()).await;
    assert_eq!(listed["imports"], json!([]));
}

#[tokio::test]
async fn test_bad_documents_and_queries() {
    let store = seeded_store(Capabilities::all());
    let app = app(store.clone(), &[]);

    let (status, _) = send(
        &app,
        Method::POST,
        "/resources/posts/imports",
        Body::from(b"id,title\n1,\xff\n".to_vec()),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        Method::POST,
        "/resources/posts/imports?delimiter=%3B%3B",
        Body::from(DOCUMENT),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::POST,
        "/resources/posts/imports?delimiter=%3B&dynamicTyping=true",
        Body::from("id;title\n9;nine\n"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"]["kind"], "finished");
    assert_eq!(
        store.records("posts").last().unwrap().get("id"),
        Some(&json!(9))
    );
    assert_eq!(store.call_count(), 2);
}

#[tokio::test]
async fn test_expired_session_is_gone() {
    let state = state(seeded_store(Capabilities::all()), &[]);
    let app = build_router(state.clone());

    let (_, body) = start(&app, DOCUMENT).await;
    let id = session_id(&body);
    assert_eq!(state.sessions.evict_idle(Duration::from_secs(60)), 0);

    let expired = state
        .sessions
        .evict_inactive_since(Utc::now() + chrono::Duration::seconds(1));
    assert_eq!(expired, 1);

    let (status, _) = answer(&app, &id, "strategy", "skipAll").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, health) = send(&app, Method::GET, "/health", Body::empty()).await;
    assert_eq!(health["openImports"], 0);
}

#[tokio::test]
async fn test_unknown_session() {
    let app = app(seeded_store(Capabilities::all()), &[]);
    let (status, body) = answer(&app, "nope", "strategy", "skipAll").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_bearer_authentication() {
    let app = app(seeded_store(Capabilities::all()), &[("AUTH_SECRET", "s3cret")]);

    let (status, _) = send(&app, Method::GET, "/imports", Body::empty()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    for (token, expected) in [("Bearer wrong", StatusCode::UNAUTHORIZED), ("Bearer s3cret", StatusCode::OK)] {
        let request = Request::builder()
            .uri("/imports")
            .header(AUTHORIZATION, token)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), expected);
    }

    // health stays public
    let (status, _) = send(&app, Method::GET, "/health", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
}
