// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The egress proxy (C3): a local HTTP server with a forward surface
//! (`POST /proxy`) consulted by sandboxed code, and a control surface
//! (`/grant`, `/revoke`, `/clear`, `/permissions`, `/health`) that mutates
//! the permission store.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::capability::{synthesize_http_descriptor, Capability};
use crate::store::PermissionStore;

/// Shared state handed to every axum handler. Cloning is cheap: both fields
/// are `Arc`s (spec §9 — the server process is the single owner of the
/// store; the proxy and the control surface each hold a reference, never a
/// cyclic one).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PermissionStore>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(store: Arc<PermissionStore>) -> Self {
        Self {
            store,
            http_client: reqwest::Client::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/proxy", post(forward))
        .route("/grant", post(grant))
        .route("/revoke", post(revoke))
        .route("/clear", post(clear))
        .route("/permissions", get(list_permissions))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Deserialize)]
struct ForwardRequest {
    url: String,
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

async fn forward(State(state): State<AppState>, Json(req): Json<ForwardRequest>) -> Response {
    let parsed = match Url::parse(&req.url) {
        Ok(url) => url,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_url", "message": err.to_string() })),
            )
                .into_response();
        }
    };

    let host = parsed.host_str().unwrap_or_default().to_string();
    let path = parsed.path().to_string();
    let descriptor = synthesize_http_descriptor(&host, &path, &req.method);

    if !state.store.check(&descriptor) {
        let request_id = Uuid::new_v4();
        warn!(%request_id, url = %req.url, method = %req.method, "DENIED");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "code": "PERMISSION_DENIED",
                "requiredPermission": descriptor,
                "attemptedAction": {
                    "type": "http_request",
                    "details": { "url": req.url, "method": req.method, "headers": req.headers },
                },
                "requestId": request_id,
            })),
        )
            .into_response();
    }

    let method = req
        .method
        .parse::<reqwest::Method>()
        .unwrap_or(reqwest::Method::GET);
    let mut builder = state.http_client.request(method, parsed.clone());
    for (key, value) in &req.headers {
        builder = builder.header(key, value);
    }
    if let Some(body) = req.body.clone() {
        builder = builder.body(body);
    }

    match builder.send().await {
        Ok(upstream) => {
            info!(url = %req.url, method = %req.method, status = %upstream.status(), "ALLOWED");
            let status = upstream.status();
            let status_text = status.canonical_reason().unwrap_or("").to_string();
            let mut headers = HashMap::new();
            for (name, value) in upstream.headers() {
                if let Ok(value) = value.to_str() {
                    headers.insert(name.to_string(), value.to_string());
                }
            }
            let body = upstream.text().await.unwrap_or_default();
            (
                StatusCode::OK,
                Json(json!({
                    "status": status.as_u16(),
                    "statusText": status_text,
                    "headers": headers,
                    "body": body,
                })),
            )
                .into_response()
        }
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": "upstream_unreachable", "message": err.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Serialize)]
struct GrantResponse {
    granted: bool,
    error: Option<String>,
}

async fn grant(State(state): State<AppState>, Json(cap): Json<Capability>) -> Response {
    match state.store.grant(cap) {
        Ok(()) => (
            StatusCode::OK,
            Json(GrantResponse {
                granted: true,
                error: None,
            }),
        )
            .into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(GrantResponse {
                granted: false,
                error: Some(err.to_string()),
            }),
        )
            .into_response(),
    }
}

async fn revoke(State(state): State<AppState>, Json(cap): Json<Capability>) -> Response {
    let revoked = state.store.revoke(&cap);
    (StatusCode::OK, Json(json!({ "revoked": revoked }))).into_response()
}

async fn clear(State(state): State<AppState>) -> Response {
    state.store.clear();
    (StatusCode::OK, Json(json!({ "cleared": true }))).into_response()
}

async fn list_permissions(State(state): State<AppState>) -> Response {
    let permissions = state.store.list();
    (StatusCode::OK, Json(json!({ "permissions": permissions }))).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(Arc::new(PermissionStore::new()))
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn forward_denies_when_ungranted() {
        let app = router(test_state());
        let body = json!({ "url": "https://example.com/", "method": "GET" }).to_string();
        let resp = app
            .oneshot(
                Request::post("/proxy")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn forward_rejects_unparseable_url_without_denial() {
        let app = router(test_state());
        let body = json!({ "url": "not a url", "method": "GET" }).to_string();
        let resp = app
            .oneshot(
                Request::post("/proxy")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn grant_then_list_round_trips() {
        let state = test_state();
        let app = router(state.clone());
        let cap = json!({ "type": "http", "host": "example.com", "description": "x" }).to_string();
        let resp = app
            .clone()
            .oneshot(
                Request::post("/grant")
                    .header("content-type", "application/json")
                    .body(Body::from(cap))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.store.list().len(), 1);
    }
}
