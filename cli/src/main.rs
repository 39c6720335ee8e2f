// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Stdio MCP server binary.
//!
//! Wires together the permission store, the egress proxy (bound to a fixed
//! loopback port), and the selected execution backend, then serves the tool
//! surface over line-delimited JSON-RPC on stdin/stdout (spec §5, §6).

use std::sync::Arc;

use aegis_sandbox_core::backend::container_mode::ContainerBackend;
use aegis_sandbox_core::backend::preload_mode::PreloadBackend;
use aegis_sandbox_core::backend::ExecutionBackend;
use aegis_sandbox_core::config::{Config, ExecutionMode};
use aegis_sandbox_core::proxy::{router, AppState};
use aegis_sandbox_core::store::PermissionStore;
use aegis_sandbox_runner::tools::{dispatch, ToolContext};
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

/// Sandboxed code execution behind a capability-mediated egress proxy.
#[derive(Parser)]
#[command(name = "aegis-sandbox-runner")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "AEGIS_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = Config::from_env();
    let store = Arc::new(PermissionStore::new());

    let proxy_listener = tokio::net::TcpListener::bind(("127.0.0.1", config.proxy_port))
        .await
        .with_context(|| format!("failed to bind egress proxy on port {}", config.proxy_port))?;
    let proxy_app = router(AppState::new(store.clone()));
    let proxy_handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(proxy_listener, proxy_app)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!(error = %err, "egress proxy exited with error");
        }
    });
    info!(port = config.proxy_port, "egress proxy listening");

    let backend: Arc<dyn ExecutionBackend> = match config.execution_mode {
        ExecutionMode::Preload => Arc::new(PreloadBackend::new(config.proxy_url.clone())),
        ExecutionMode::Container => Arc::new(
            ContainerBackend::new(
                config.runtime_image.clone(),
                config.container_cpus,
                config.container_memory_mb,
                config.package_cache_dir.clone(),
            )
            .context("failed to initialize container backend")?,
        ),
    };

    let ctx = ToolContext {
        store: store.clone(),
        backend: backend.clone(),
        default_timeout: config.default_timeout,
    };

    info!(mode = ?config.execution_mode, "aegis-sandbox-runner ready");
    serve_stdio(&ctx).await;

    backend.shutdown().await;
    proxy_handle.abort();
    info!("shutdown complete");
    Ok(())
}

/// Reads line-delimited JSON-RPC `tools/call` requests from stdin and
/// writes one JSON-RPC response per line to stdout, until stdin closes or a
/// shutdown signal fires (spec §5: SIGINT/SIGTERM/stdin-closed are
/// equivalent shutdown triggers).
async fn serve_stdio(ctx: &ToolContext) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let response = handle_line(ctx, &line).await;
                        let mut serialized = serde_json::to_string(&response).expect("response always serializes");
                        serialized.push('\n');
                        if stdout.write_all(serialized.as_bytes()).await.is_err() {
                            error!("failed to write to stdout, exiting");
                            return;
                        }
                        let _ = stdout.flush().await;
                    }
                    Ok(None) => {
                        info!("stdin closed, shutting down");
                        return;
                    }
                    Err(err) => {
                        error!(error = %err, "failed to read stdin, shutting down");
                        return;
                    }
                }
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received");
                return;
            }
        }
    }
}

async fn handle_line(ctx: &ToolContext, line: &str) -> Value {
    let request: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            return json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": { "code": -32700, "message": format!("parse error: {err}") },
            });
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();

    if method != "tools/call" {
        return json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("unsupported method `{method}`") },
        });
    }

    let params = request.get("params").cloned().unwrap_or(Value::Null);
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match dispatch(ctx, name, arguments).await {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(err) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32602, "message": err.to_string() },
        }),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
