mod common;

use axum::body::{to_bytes, Body, BodyDataStream};
use axum::http::{Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use cloud_logging_mcp::http::{build_router, SessionRegistry};

use common::harness;

fn post_message(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn call_tool(id: u64, name: &str, arguments: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    })
    .to_string()
}

async fn next_event(stream: &mut BodyDataStream) -> (String, String) {
    let chunk = stream.next().await.expect("stream ended").unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    let mut event = String::new();
    let mut data = String::new();
    for line in text.lines() {
        if let Some(v) = line.strip_prefix("event: ") {
            event = v.to_string();
        } else if let Some(v) = line.strip_prefix("data: ") {
            data = v.to_string();
        }
    }
    (event, data)
}

async fn open_stream(app: &Router) -> (String, BodyDataStream) {
    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let mut stream = resp.into_body().into_data_stream();
    let (event, data) = next_event(&mut stream).await;
    assert_eq!(event, "endpoint");
    assert!(data.starts_with("/message?sessionId="), "{data}");
    (data, stream)
}

#[tokio::test]
async fn sse_round_trip_and_cleanup_on_disconnect() {
    let h = harness();
    let sessions = SessionRegistry::new();
    let app = build_router(h.dispatcher.clone(), sessions.clone());

    let (endpoint, mut stream) = open_stream(&app).await;
    assert_eq!(sessions.len(), 1);

    let resp = app
        .clone()
        .oneshot(post_message(
            &endpoint,
            call_tool(1, "select-project", json!({ "projectId": "proj-A" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let (event, data) = next_event(&mut stream).await;
    assert_eq!(event, "message");
    let rpc: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(rpc["id"], 1);
    assert_eq!(rpc["result"]["content"][0]["text"], "Project selected successfully!");

    let resp = app
        .clone()
        .oneshot(post_message(&endpoint, call_tool(2, "get-logs", json!({ "pageSize": 3 }))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let (_, data) = next_event(&mut stream).await;
    let rpc: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(rpc["id"], 2);
    let (_, query) = &h.logs.queries()[0];
    assert_eq!(query.project_id, "proj-A");
    assert_eq!(query.page_size, 3);

    drop(stream);
    assert!(sessions.is_empty());

    let resp = app
        .clone()
        .oneshot(post_message(&endpoint, call_tool(3, "list-projects", json!({}))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn selection_is_scoped_to_its_sse_session() {
    let h = harness();
    let sessions = SessionRegistry::new();
    let app = build_router(h.dispatcher.clone(), sessions.clone());

    let (first, mut first_stream) = open_stream(&app).await;
    let (second, mut second_stream) = open_stream(&app).await;
    assert_ne!(first, second);
    assert_eq!(sessions.len(), 2);

    app.clone()
        .oneshot(post_message(&first, call_tool(1, "select-project", json!({ "projectId": "proj-A" }))))
        .await
        .unwrap();
    next_event(&mut first_stream).await;

    app.clone()
        .oneshot(post_message(&second, call_tool(1, "get-logs", json!({}))))
        .await
        .unwrap();
    let (_, data) = next_event(&mut second_stream).await;
    let rpc: Value = serde_json::from_str(&data).unwrap();
    assert!(rpc["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("No project selected"));
    assert!(h.logs.queries().is_empty());
}

#[tokio::test]
async fn unknown_session_is_404_without_dispatch() {
    let h = harness();
    let app = build_router(h.dispatcher.clone(), SessionRegistry::new());

    let resp = app
        .oneshot(post_message(
            "/message?sessionId=does-not-exist",
            call_tool(1, "select-project", json!({ "projectId": "proj-A" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.credentials.calls(), 0);
}

#[tokio::test]
async fn missing_session_id_is_400() {
    let h = harness();
    let app = build_router(h.dispatcher.clone(), SessionRegistry::new());

    for uri in ["/message", "/message?sessionId=", "/message?other=1"] {
        let resp = app
            .clone()
            .oneshot(post_message(uri, call_tool(1, "list-projects", json!({}))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn invalid_body_for_live_session_is_400() {
    let h = harness();
    let sessions = SessionRegistry::new();
    let (id, _rx, _guard) = sessions.open();
    let app = build_router(h.dispatcher.clone(), sessions.clone());

    let resp = app
        .oneshot(post_message(&format!("/message?sessionId={id}"), "not-json"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    assert!(String::from_utf8_lossy(&body).contains("invalid message"));
    assert!(sessions.contains(&id));
}

#[tokio::test]
async fn wrong_method_and_unknown_path() {
    let h = harness();
    let app = build_router(h.dispatcher.clone(), SessionRegistry::new());

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/message?sessionId=x").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/search").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(post_message("/", "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_close_is_idempotent() {
    let sessions = SessionRegistry::new();
    let (id, _rx, guard) = sessions.open();
    assert!(sessions.contains(&id));

    assert!(sessions.close(&id));
    assert!(!sessions.close(&id));
    assert!(!sessions.contains(&id));

    // the guard's own close is a no-op now
    drop(guard);
    assert!(sessions.is_empty());
}
