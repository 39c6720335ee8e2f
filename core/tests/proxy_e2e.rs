// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end exercises of the egress proxy against a mocked upstream,
//! covering the allow/deny/revoke scenarios from the project's testable
//! properties (S1, S2, S6).

use std::sync::Arc;

use aegis_sandbox_core::capability::Capability;
use aegis_sandbox_core::proxy::{router, AppState};
use aegis_sandbox_core::store::PermissionStore;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send_forward(app: axum::Router, url: &str, method: &str) -> (StatusCode, Value) {
    let body = json!({ "url": url, "method": method }).to_string();
    let response = app
        .oneshot(
            Request::post("/proxy")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    (status, value)
}

#[tokio::test]
async fn s1_allow_after_grant() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(200)
        .with_body("hello")
        .create_async()
        .await;

    let store = Arc::new(PermissionStore::new());
    let host = server.host_with_port();
    let bare_host = host.split(':').next().unwrap().to_string();
    store
        .grant(Capability::Http {
            host: bare_host,
            path_pattern: None,
            methods: None,
            description: "allow test upstream".to_string(),
        })
        .unwrap();

    let app = router(AppState::new(store));
    let url = format!("http://{host}/");
    let (status, body) = send_forward(app, &url, "GET").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], 200);
    assert_eq!(body["body"], "hello");
    mock.assert_async().await;
}

#[tokio::test]
async fn s2_deny_then_grant_then_retry_allows() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let store = Arc::new(PermissionStore::new());
    let host = server.host_with_port();
    let url = format!("http://{host}/");

    let app = router(AppState::new(store.clone()));
    let (status, body) = send_forward(app, &url, "GET").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "PERMISSION_DENIED");
    let required = &body["requiredPermission"];
    assert_eq!(required["type"], "http");

    let bare_host = host.split(':').next().unwrap().to_string();
    store
        .grant(Capability::Http {
            host: bare_host,
            path_pattern: Some(required["pathPattern"].as_str().unwrap().to_string()),
            methods: Some(vec![required["methods"][0].as_str().unwrap().to_string()]),
            description: "retry grant".to_string(),
        })
        .unwrap();

    let app = router(AppState::new(store));
    let (status, _) = send_forward(app, &url, "GET").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn s6_revoke_then_resubmit_denies() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(200)
        .create_async()
        .await;

    let store = Arc::new(PermissionStore::new());
    let host = server.host_with_port();
    let bare_host = host.split(':').next().unwrap().to_string();
    let cap = Capability::Http {
        host: bare_host,
        path_pattern: None,
        methods: None,
        description: "x".to_string(),
    };
    store.grant(cap.clone()).unwrap();
    assert!(store.revoke(&cap));

    let app = router(AppState::new(store));
    let url = format!("http://{host}/");
    let (status, _) = send_forward(app, &url, "GET").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
