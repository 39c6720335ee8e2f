// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Preload-mode execution backend: each run spawns a fresh interpreter
//! subprocess with the network shim (C4) preloaded (spec §4.5).

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;
use uuid::Uuid;

use super::{extract_denial, ExecutionBackend, ExecutionRequest, ExecutionResult};
use crate::preload::render_shim;

pub struct PreloadBackend {
    proxy_url: String,
    interpreter: String,
    http_client: reqwest::Client,
    work_dir: std::path::PathBuf,
}

impl PreloadBackend {
    pub fn new(proxy_url: String) -> Self {
        Self {
            proxy_url,
            interpreter: std::env::var("RUNTIME_INTERPRETER").unwrap_or_else(|_| "bun".to_string()),
            http_client: reqwest::Client::new(),
            work_dir: std::env::temp_dir(),
        }
    }

    async fn proxy_is_reachable(&self) -> bool {
        self.http_client
            .get(format!("{}/health", self.proxy_url))
            .send()
            .await
            .map(|resp| resp.status().is_success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ExecutionBackend for PreloadBackend {
    async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        if !self.proxy_is_reachable().await {
            return ExecutionResult::InfraError {
                message: format!("proxy at {} is unreachable", self.proxy_url),
            };
        }

        let run_id = Uuid::new_v4();
        let code_path = self.work_dir.join(format!("aegis-run-{run_id}.js"));
        let shim_path = self.work_dir.join(format!("aegis-shim-{run_id}.js"));

        if let Err(err) = write_file(&code_path, &request.code).await {
            return ExecutionResult::InfraError {
                message: format!("failed to write code file: {err}"),
            };
        }
        if let Err(err) = write_file(&shim_path, &render_shim()).await {
            let _ = tokio::fs::remove_file(&code_path).await;
            return ExecutionResult::InfraError {
                message: format!("failed to write preload shim: {err}"),
            };
        }

        let result = self.spawn_and_wait(&shim_path, &code_path, request.timeout).await;

        let _ = tokio::fs::remove_file(&code_path).await;
        let _ = tokio::fs::remove_file(&shim_path).await;
        result
    }

    async fn shutdown(&self) {
        // Preload mode owns no long-lived resources beyond per-run temp
        // files, which are removed as each run completes.
    }
}

impl PreloadBackend {
    async fn spawn_and_wait(
        &self,
        shim_path: &std::path::Path,
        code_path: &std::path::Path,
        timeout: std::time::Duration,
    ) -> ExecutionResult {
        let mut child = match Command::new(&self.interpreter)
            .arg("--preload")
            .arg(shim_path)
            .arg(code_path)
            .env("PROXY_URL", &self.proxy_url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                return ExecutionResult::InfraError {
                    message: format!("failed to spawn `{}`: {err}", self.interpreter),
                };
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let exit_code = output.status.code().unwrap_or(-1);

                if output.status.success() {
                    ExecutionResult::Ok { stdout, exit_code }
                } else if let Some(descriptor) = extract_denial(&stderr) {
                    ExecutionResult::PermissionDenied { descriptor }
                } else {
                    ExecutionResult::CodeError {
                        stdout,
                        stderr,
                        exit_code,
                    }
                }
            }
            Ok(Err(err)) => ExecutionResult::InfraError {
                message: format!("failed to read subprocess output: {err}"),
            },
            Err(_) => {
                warn!("execution exceeded {:?}, killing subprocess", timeout);
                ExecutionResult::CodeError {
                    stdout: String::new(),
                    stderr: format!("killed: execution exceeded {timeout:?} timeout"),
                    exit_code: -1,
                }
            }
        }
    }
}

async fn write_file(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn proxy_unreachable_short_circuits_before_spawn() {
        let backend = PreloadBackend::new("http://127.0.0.1:1".to_string());
        let result = backend
            .run(ExecutionRequest {
                code: "console.log('hi')".to_string(),
                timeout: std::time::Duration::from_millis(100),
            })
            .await;
        assert!(matches!(result, ExecutionResult::InfraError { .. }));
    }
}
