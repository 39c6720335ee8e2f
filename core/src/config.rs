// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server-side configuration, read from environment variables (spec §6).

use std::time::Duration;

/// Selects which [`crate::backend`] implementation executes submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Preload,
    Container,
}

impl ExecutionMode {
    fn from_env(value: &str) -> Self {
        match value {
            "container" => ExecutionMode::Container,
            _ => ExecutionMode::Preload,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub execution_mode: ExecutionMode,
    pub proxy_port: u16,
    pub proxy_url: String,
    pub container_cpus: f64,
    pub container_memory_mb: u64,
    pub default_timeout: Duration,
    pub runtime_image: String,
    pub package_cache_dir: std::path::PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let proxy_port: u16 = std::env::var("PROXY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9999);

        let proxy_url = std::env::var("PROXY_URL")
            .unwrap_or_else(|_| format!("http://127.0.0.1:{proxy_port}"));

        let execution_mode = std::env::var("EXECUTION_MODE")
            .map(|v| ExecutionMode::from_env(&v))
            .unwrap_or(ExecutionMode::Preload);

        let container_cpus = std::env::var("CONTAINER_CPUS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2.0);

        let container_memory_mb = std::env::var("CONTAINER_MEMORY_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(512);

        let default_timeout_ms = std::env::var("EXECUTION_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30_000u64);

        let runtime_image = std::env::var("RUNTIME_IMAGE")
            .unwrap_or_else(|_| "oven/bun:1".to_string());

        let package_cache_dir = std::env::var("PACKAGE_CACHE_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| {
                dirs_data_dir().join("aegis-sandbox-runner").join("packages").join("node_modules")
            });

        Self {
            execution_mode,
            proxy_port,
            proxy_url,
            container_cpus,
            container_memory_mb,
            default_timeout: Duration::from_millis(default_timeout_ms),
            runtime_image,
            package_cache_dir,
        }
    }
}

/// Minimal stand-in for a user-data-dir lookup, avoiding a dependency on a
/// platform-dirs crate for a single fallback path.
fn dirs_data_dir() -> std::path::PathBuf {
    std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".local")
        .join("share")
}
