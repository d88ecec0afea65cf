//! Token refresh through stored client credentials against a local panel.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use panelgate_api::submission::slots::panel_target;
use panelgate_api::submission::{StoreTokenRefresher, SubmissionStore};
use panelgate_panel::{PanelApi, PanelError, PanelManager, TokenRefresher};
use serde_json::json;

use common::{panel, MemoryStore};

struct TokenPanel {
    token_requests: AtomicUsize,
}

async fn issue_token(
    State(state): State<Arc<TokenPanel>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    let valid = params.get("client_id").map(String::as_str) == Some("client")
        && params.get("client_secret").map(String::as_str) == Some("secret");
    if !valid {
        return Json(json!({ "code": 400, "message": "bad credentials" })).into_response();
    }
    Json(json!({
        "code": 200,
        "data": { "token": "fresh", "token_type": "Bearer", "expiration": 1_900_000_000 }
    }))
    .into_response()
}

async fn list_envs(headers: HeaderMap) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "Bearer fresh");
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "code": 200, "data": [{ "id": 1, "name": "A", "value": "x", "status": 0 }] }))
        .into_response()
}

async fn spawn_panel() -> (String, Arc<TokenPanel>) {
    let state = Arc::new(TokenPanel {
        token_requests: AtomicUsize::new(0),
    });
    let app = Router::new()
        .route("/open/auth/token", get(issue_token))
        .route("/open/envs", get(list_envs))
        .with_state(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn stale_token_is_replaced_and_persisted() {
    let (url, token_panel) = spawn_panel().await;
    let store = Arc::new(MemoryStore::default());
    let mut stored = panel(5);
    stored.url = url;
    stored.token = Some("stale".to_string());
    store.bind_panel(1, stored.clone());

    let http = reqwest::Client::new();
    let refresher = Arc::new(StoreTokenRefresher::new(
        Arc::clone(&store) as Arc<dyn SubmissionStore>,
        http.clone(),
    ));
    let manager = PanelManager::new(http, refresher);
    let client = manager.client_for(&panel_target(&stored)).await;

    let envs = client.list_envs().await.unwrap();
    assert_eq!(envs.len(), 1);
    assert_eq!(client.token(), "fresh");
    assert_eq!(token_panel.token_requests.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.saved_tokens.lock().unwrap().get(&5),
        Some(&("fresh".to_string(), Some(1_900_000_000)))
    );
    assert_eq!(client.token_expires_at(), Some(1_900_000_000));
}

#[tokio::test]
async fn stored_token_past_expiry_is_refreshed_up_front() {
    let (url, token_panel) = spawn_panel().await;
    let store = Arc::new(MemoryStore::default());
    let mut stored = panel(8);
    stored.url = url;
    stored.token = Some("fresh-but-old".to_string());
    stored.token_expires_at = Some(chrono::Utc::now().timestamp() - 60);
    store.bind_panel(1, stored.clone());

    let http = reqwest::Client::new();
    let refresher = Arc::new(StoreTokenRefresher::new(
        Arc::clone(&store) as Arc<dyn SubmissionStore>,
        http.clone(),
    ));
    let manager = PanelManager::new(http, refresher);
    let client = manager.client_for(&panel_target(&stored)).await;

    client.list_envs().await.unwrap();
    assert_eq!(client.token(), "fresh");
    assert_eq!(token_panel.token_requests.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.saved_tokens.lock().unwrap().get(&8).map(|(_, at)| *at),
        Some(Some(1_900_000_000))
    );
}

#[tokio::test]
async fn wrong_credentials_fail_the_refresh() {
    let (url, _) = spawn_panel().await;
    let store = Arc::new(MemoryStore::default());
    let mut stored = panel(6);
    stored.url = url;
    stored.client_secret = "wrong".to_string();
    store.bind_panel(1, stored);

    let refresher = StoreTokenRefresher::new(store.clone(), reqwest::Client::new());
    let err = refresher.refresh(6).await.unwrap_err();
    assert!(matches!(err, PanelError::RefreshFailed(ref reason) if reason.contains("bad credentials")));
    assert!(store.saved_tokens.lock().unwrap().is_empty());
}

#[tokio::test]
async fn panel_deleted_before_token_is_saved_fails_the_refresh() {
    let (url, token_panel) = spawn_panel().await;
    let store = Arc::new(MemoryStore::default());
    let mut stored = panel(7);
    stored.url = url;
    store.bind_panel(1, stored);
    store.panels_vanish_on_save.store(true, Ordering::SeqCst);

    let refresher = StoreTokenRefresher::new(store.clone(), reqwest::Client::new());
    let err = refresher.refresh(7).await.unwrap_err();
    assert!(matches!(err, PanelError::RefreshFailed(ref reason) if reason.contains("no longer exists")));
    assert_eq!(token_panel.token_requests.load(Ordering::SeqCst), 1);
    assert!(store.saved_tokens.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_panel_fails_the_refresh() {
    let store = Arc::new(MemoryStore::default());
    let refresher = StoreTokenRefresher::new(store, reqwest::Client::new());
    let err = refresher.refresh(99).await.unwrap_err();
    assert!(matches!(err, PanelError::RefreshFailed(ref reason) if reason.contains("no longer exists")));
}
