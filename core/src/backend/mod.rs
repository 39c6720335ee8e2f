// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Execution backend (C5): runs submitted code in one of two isolation
//! modes and reports back a tagged result (spec §3, §4.5).

pub mod container_mode;
pub mod preload_mode;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::capability::Capability;

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    pub timeout: Duration,
}

/// Tagged execution outcome. This is what the tool surface serializes back
/// to the caller (spec §3, §4.5 failure table).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum ExecutionResult {
    #[serde(rename = "ok")]
    Ok { stdout: String, exit_code: i32 },
    #[serde(rename = "code_error")]
    CodeError {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    #[serde(rename = "permission_denied")]
    PermissionDenied { descriptor: Capability },
    #[serde(rename = "infra_error")]
    InfraError { message: String },
}

/// Common shape both execution modes implement, so the tool surface and
/// shutdown wiring don't need to know which one is active.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn run(&self, request: ExecutionRequest) -> ExecutionResult;

    /// Best-effort teardown on server shutdown (spec §4.5 step 6, §5).
    /// Failures are logged, never fatal.
    async fn shutdown(&self);
}

/// Scans stderr line-by-line for the first well-formed denial marker line
/// emitted by the preload shim (spec §4.4, §4.5). Shared by both backends
/// since both surface denials across a stderr boundary.
pub fn extract_denial(stderr: &str) -> Option<Capability> {
    for line in stderr.lines() {
        let Some(rest) = line
            .trim_start()
            .strip_prefix(crate::preload::DENIAL_MARKER)
        else {
            continue;
        };
        let rest = rest.trim_start();
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(rest) {
            if value.get("code").and_then(|c| c.as_str()) == Some("PERMISSION_DENIED") {
                if let Some(descriptor) = value.get("requiredPermission") {
                    if let Ok(cap) = serde_json::from_value::<Capability>(descriptor.clone()) {
                        return Some(cap);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_denial_finds_marker_line_among_noise() {
        let stderr = format!(
            "some warning\n{} {}\ntrailing\n",
            crate::preload::DENIAL_MARKER,
            serde_json::json!({
                "code": "PERMISSION_DENIED",
                "requiredPermission": {
                    "type": "http",
                    "host": "example.com",
                    "description": "x",
                },
            })
        );
        let cap = extract_denial(&stderr);
        assert!(matches!(cap, Some(Capability::Http { host, .. }) if host == "example.com"));
    }

    #[test]
    fn extract_denial_returns_none_for_plain_code_error() {
        assert!(extract_denial("TypeError: boom\n    at <anonymous>").is_none());
    }
}
