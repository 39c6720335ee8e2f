// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The four tools exposed over the stdio tool-calling surface (spec §6):
//! `run_code`, `grant_permission`, `list_permissions`, `revoke_permission`.
//!
//! Kept independent of the JSON-RPC framing in [`crate`]'s main loop so it
//! can be exercised directly in tests.

use std::sync::Arc;
use std::time::Duration;

use aegis_sandbox_core::backend::{ExecutionBackend, ExecutionRequest};
use aegis_sandbox_core::capability::Capability;
use aegis_sandbox_core::store::PermissionStore;
use serde_json::{json, Value};
use thiserror::Error;

pub struct ToolContext {
    pub store: Arc<PermissionStore>,
    pub backend: Arc<dyn ExecutionBackend>,
    pub default_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

pub async fn dispatch(ctx: &ToolContext, name: &str, arguments: Value) -> Result<Value, ToolError> {
    match name {
        "run_code" => run_code(ctx, arguments).await,
        "grant_permission" => grant_permission(ctx, arguments),
        "list_permissions" => list_permissions(ctx),
        "revoke_permission" => revoke_permission(ctx, arguments),
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

async fn run_code(ctx: &ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let code = arguments
        .get("code")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments("missing required field `code` (string)".to_string()))?
        .to_string();

    let timeout = arguments
        .get("timeout")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(ctx.default_timeout);

    let result = ctx.backend.run(ExecutionRequest { code, timeout }).await;
    Ok(serde_json::to_value(result).expect("ExecutionResult always serializes"))
}

fn parse_capability(arguments: &Value) -> Result<Capability, ToolError> {
    let permission = arguments.get("permission").ok_or_else(|| {
        ToolError::InvalidArguments(
            r#"missing required field `permission`; example: {"type":"http","host":"example.com","description":"allow example.com"}"#
                .to_string(),
        )
    })?;
    serde_json::from_value::<Capability>(permission.clone())
        .map_err(|err| ToolError::InvalidArguments(format!("malformed permission: {err}")))
}

fn grant_permission(ctx: &ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let cap = parse_capability(&arguments)?;
    match ctx.store.grant(cap.clone()) {
        Ok(()) => Ok(json!({
            "granted": true,
            "permission": cap.describe(),
            "totalPermissions": ctx.store.list().len(),
        })),
        Err(err) => Err(ToolError::InvalidArguments(err.to_string())),
    }
}

fn list_permissions(ctx: &ToolContext) -> Result<Value, ToolError> {
    let permissions = ctx.store.list();
    let total = permissions.len();
    let permissions: Vec<Value> = permissions
        .iter()
        .map(|cap| json!({ "capability": cap, "description": cap.describe() }))
        .collect();
    Ok(json!({ "permissions": permissions, "total": total }))
}

fn revoke_permission(ctx: &ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let cap = parse_capability(&arguments)?;
    let revoked = ctx.store.revoke(&cap);
    Ok(json!({
        "revoked": revoked,
        "permission": cap.describe(),
        "totalPermissions": ctx.store.list().len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_sandbox_core::backend::ExecutionResult;
    use async_trait::async_trait;

    struct StubBackend;

    #[async_trait]
    impl ExecutionBackend for StubBackend {
        async fn run(&self, _request: ExecutionRequest) -> ExecutionResult {
            ExecutionResult::Ok {
                stdout: "hi".to_string(),
                exit_code: 0,
            }
        }

        async fn shutdown(&self) {}
    }

    fn ctx() -> ToolContext {
        ToolContext {
            store: Arc::new(PermissionStore::new()),
            backend: Arc::new(StubBackend),
            default_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn run_code_requires_code_field() {
        let ctx = ctx();
        let err = dispatch(&ctx, "run_code", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn run_code_returns_ok_result() {
        let ctx = ctx();
        let result = dispatch(&ctx, "run_code", json!({ "code": "1+1" })).await.unwrap();
        assert_eq!(result["status"], "ok");
    }

    #[tokio::test]
    async fn grant_then_list_then_revoke_round_trips() {
        let ctx = ctx();
        let permission = json!({ "type": "http", "host": "example.com", "description": "x" });

        let granted = dispatch(&ctx, "grant_permission", json!({ "permission": permission.clone() }))
            .await
            .unwrap();
        assert_eq!(granted["granted"], true);
        assert_eq!(granted["totalPermissions"], 1);

        let listed = dispatch(&ctx, "list_permissions", json!({})).await.unwrap();
        assert_eq!(listed["total"], 1);

        let revoked = dispatch(&ctx, "revoke_permission", json!({ "permission": permission }))
            .await
            .unwrap();
        assert_eq!(revoked["revoked"], true);
        assert_eq!(revoked["totalPermissions"], 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let ctx = ctx();
        let err = dispatch(&ctx, "not_a_tool", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }
}
