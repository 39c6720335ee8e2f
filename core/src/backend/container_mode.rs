// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Container-mode execution backend: a single long-lived session container
//! per server process, reused across runs, with a shared host-mounted
//! package cache (spec §4.5).

use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use parking_lot::Mutex as SyncMutex;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{extract_denial, ExecutionBackend, ExecutionRequest, ExecutionResult};
use crate::preload::render_shim;

/// In-container path where the package cache is mounted (spec §3, §6).
const CACHE_MOUNT: &str = "/aegis/packages/node_modules";
/// In-container path where per-run code files are written.
const CODE_MOUNT: &str = "/aegis/code";

/// Runtime builtin module names excluded from package resolution (spec
/// §4.5 step 4). Not exhaustive of every host runtime, but covers the
/// common Node/Bun builtins plus the `node:` prefix scheme.
const BUILTIN_MODULES: &[&str] = &[
    "fs", "path", "http", "https", "url", "util", "events", "stream", "buffer", "crypto", "os",
    "child_process", "assert", "net", "tls", "zlib", "querystring", "readline", "dns", "cluster",
    "module", "timers", "string_decoder", "worker_threads", "perf_hooks", "process", "vm",
];

#[derive(Clone)]
struct SessionContainer {
    container_id: String,
    code_mount_dir: std::path::PathBuf,
}

pub struct ContainerBackend {
    docker: Docker,
    image: String,
    cpus: f64,
    memory_mb: u64,
    cache_dir: std::path::PathBuf,
    session: Arc<Mutex<Option<SessionContainer>>>,
    /// Package names already confirmed present in the cache, avoiding a
    /// filesystem stat on every run for repeat imports (spec testable
    /// property 6: no new installations on a repeat run).
    known_installed: Arc<SyncMutex<std::collections::HashSet<String>>>,
}

impl ContainerBackend {
    pub fn new(image: String, cpus: f64, memory_mb: u64, cache_dir: std::path::PathBuf) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|err| anyhow::anyhow!("failed to connect to Docker: {err}"))?;
        Ok(Self {
            docker,
            image,
            cpus,
            memory_mb,
            cache_dir,
            session: Arc::new(Mutex::new(None)),
            known_installed: Arc::new(SyncMutex::new(std::collections::HashSet::new())),
        })
    }

    async fn ensure_image(&self) -> Result<(), String> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            return Ok(());
        }
        info!(image = %self.image, "pulling runtime image");
        let options = CreateImageOptions {
            from_image: self.image.clone(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            if let Err(err) = progress {
                return Err(format!("image pull failed: {err}"));
            }
        }
        Ok(())
    }

    async fn ensure_session(&self) -> Result<SessionContainer, String> {
        let mut guard = self.session.lock().await;

        if let Some(session) = guard.as_ref() {
            match self.docker.inspect_container(&session.container_id, None).await {
                Ok(inspect) if inspect.state.and_then(|s| s.running).unwrap_or(false) => {
                    return Ok(session.clone());
                }
                _ => {
                    warn!(container_id = %session.container_id, "session container no longer running, replacing");
                    *guard = None;
                }
            }
        }

        self.ensure_image().await?;

        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|err| format!("failed to create package cache dir: {err}"))?;

        let code_mount_dir = std::env::temp_dir().join(format!("aegis-code-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&code_mount_dir)
            .map_err(|err| format!("failed to create code mount dir: {err}"))?;

        let host_config = HostConfig {
            binds: Some(vec![
                format!("{}:{}", self.cache_dir.display(), CACHE_MOUNT),
                format!("{}:{}", code_mount_dir.display(), CODE_MOUNT),
            ]),
            memory: Some((self.memory_mb * 1024 * 1024) as i64),
            nano_cpus: Some((self.cpus * 1_000_000_000.0) as i64),
            ..Default::default()
        };

        let config = ContainerConfig {
            image: Some(self.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: Some(vec![format!("NODE_PATH={CACHE_MOUNT}")]),
            host_config: Some(host_config),
            ..Default::default()
        };

        let name = format!("aegis-sandbox-{}", Uuid::new_v4());
        let container = self
            .docker
            .create_container(Some(CreateContainerOptions { name, platform: None }), config)
            .await
            .map_err(|err| format!("failed to create session container: {err}"))?;

        self.docker
            .start_container::<String>(&container.id, None)
            .await
            .map_err(|err| format!("failed to start session container: {err}"))?;

        let session = SessionContainer {
            container_id: container.id,
            code_mount_dir,
        };
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn exec(&self, container_id: &str, cmd: Vec<String>) -> Result<(String, String, i64), String> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| format!("exec create failed: {err}"))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|err| format!("exec start failed: {err}"))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(err) => return Err(format!("exec stream error: {err}")),
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|err| format!("exec inspect failed: {err}"))?;
        let exit_code = inspect.exit_code.unwrap_or(-1);
        Ok((stdout, stderr, exit_code))
    }

    async fn ensure_packages(&self, container_id: &str, code: &str) -> Result<(), String> {
        let packages = scan_import_packages(code);
        let mut missing = Vec::new();
        {
            let known = self.known_installed.lock();
            for pkg in &packages {
                if known.contains(pkg) {
                    continue;
                }
                if self.cache_dir.join(pkg).is_dir() {
                    continue;
                }
                missing.push(pkg.clone());
            }
        }
        if missing.is_empty() {
            let mut known = self.known_installed.lock();
            known.extend(packages);
            return Ok(());
        }

        info!(packages = ?missing, "installing missing packages into cache");
        let mut cmd = vec!["bun".to_string(), "add".to_string(), "--cwd".to_string(), CACHE_MOUNT.to_string()];
        cmd.extend(missing.iter().cloned());
        let (_, stderr, exit_code) = self.exec(container_id, cmd).await?;
        if exit_code != 0 {
            return Err(format!("package install failed for {missing:?}: {stderr}"));
        }

        let mut known = self.known_installed.lock();
        known.extend(packages);
        Ok(())
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        let session = match self.ensure_session().await {
            Ok(session) => session,
            Err(message) => return ExecutionResult::InfraError { message },
        };

        if let Err(message) = self.ensure_packages(&session.container_id, &request.code).await {
            return ExecutionResult::InfraError { message };
        }

        let run_id = Uuid::new_v4();
        let code_file_name = format!("run-{run_id}.js");
        let shim_file_name = format!("shim-{run_id}.js");
        let host_code_path = session.code_mount_dir.join(&code_file_name);
        let host_shim_path = session.code_mount_dir.join(&shim_file_name);

        if let Err(err) = tokio::fs::write(&host_code_path, &request.code).await {
            return ExecutionResult::InfraError {
                message: format!("failed to write code file: {err}"),
            };
        }
        if let Err(err) = tokio::fs::write(&host_shim_path, render_shim()).await {
            let _ = tokio::fs::remove_file(&host_code_path).await;
            return ExecutionResult::InfraError {
                message: format!("failed to write preload shim: {err}"),
            };
        }

        let container_code_path = format!("{CODE_MOUNT}/{code_file_name}");
        let container_shim_path = format!("{CODE_MOUNT}/{shim_file_name}");

        let exec_future = self.exec(
            &session.container_id,
            vec![
                "bun".to_string(),
                "--preload".to_string(),
                container_shim_path,
                container_code_path,
            ],
        );

        let result = match tokio::time::timeout(request.timeout, exec_future).await {
            Ok(Ok((stdout, stderr, exit_code))) => {
                if exit_code == 0 {
                    ExecutionResult::Ok {
                        stdout,
                        exit_code: exit_code as i32,
                    }
                } else if let Some(descriptor) = extract_denial(&stderr) {
                    ExecutionResult::PermissionDenied { descriptor }
                } else {
                    ExecutionResult::CodeError {
                        stdout,
                        stderr,
                        exit_code: exit_code as i32,
                    }
                }
            }
            Ok(Err(message)) => ExecutionResult::InfraError { message },
            Err(_) => {
                warn!("container exec exceeded {:?} timeout", request.timeout);
                ExecutionResult::CodeError {
                    stdout: String::new(),
                    stderr: format!("killed: execution exceeded {:?} timeout", request.timeout),
                    exit_code: -1,
                }
            }
        };

        let _ = tokio::fs::remove_file(&host_code_path).await;
        let _ = tokio::fs::remove_file(&host_shim_path).await;
        result
    }

    async fn shutdown(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            let result = self
                .docker
                .remove_container(
                    &session.container_id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            if let Err(err) = result {
                warn!(container_id = %session.container_id, error = %err, "failed to remove session container");
            }
            if let Err(err) = std::fs::remove_dir_all(&session.code_mount_dir) {
                warn!(dir = %session.code_mount_dir.display(), error = %err, "failed to remove code mount dir");
            }
        }
    }
}

/// Statically scans `code` for import specifiers (ES `import`, dynamic
/// `import()`, CommonJS `require`, re-export `from`), drops relative/
/// absolute paths and runtime builtins, and reduces each remaining
/// specifier to its package name — handling `@scope/name` as a two-segment
/// name (spec §4.5 step 4).
fn scan_import_packages(code: &str) -> Vec<String> {
    let pattern = Regex::new(
        r#"(?:\bimport\s+(?:[^'"]*?\sfrom\s+)?|\bexport\s+[^'"]*?\sfrom\s+|\brequire\s*\(\s*|\bimport\s*\(\s*)['"]([^'"]+)['"]"#,
    )
    .expect("static regex is valid");

    let mut names = std::collections::BTreeSet::new();
    for captures in pattern.captures_iter(code) {
        let specifier = &captures[1];
        if specifier.starts_with('.') || specifier.starts_with('/') {
            continue;
        }
        if specifier.starts_with("node:") {
            continue;
        }
        let package_name = if let Some(rest) = specifier.strip_prefix('@') {
            match rest.split_once('/') {
                Some((scope, name)) => {
                    let first_segment = name.split('/').next().unwrap_or(name);
                    format!("@{scope}/{first_segment}")
                }
                None => continue,
            }
        } else {
            specifier.split('/').next().unwrap_or(specifier).to_string()
        };

        if BUILTIN_MODULES.contains(&package_name.as_str()) {
            continue;
        }
        names.insert(package_name);
    }
    names.into_iter().collect()
}
