//! Docker/Podman CLI runtime
//!
//! Drives the runtime through its command line client:
//! - `run -d` to start runner containers
//! - `inspect` to read state, exit code and labels
//! - `rm -f` to remove containers
//! - `logs --tail` to read runner output
//! - `ps --filter label=...` to find managed containers
//!
//! Every invocation is bounded by the runtime timeout and killed when it expires.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ContainerRuntime, ContainerSpec, ContainerState, ManagedContainer, labels};
use crate::error::{OrchestratorError, Result};

const INSPECT_FORMAT: &str = "{{.State.Status}}\t{{.State.ExitCode}}\t{{json .Config.Labels}}";

/// Container runtime driven through the `docker` or `podman` binary
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,
    timeout: Duration,
}

impl CliRuntime {
    /// # Arguments
    /// * `binary` - Runtime CLI, e.g. `docker` or `podman`
    /// * `timeout` - Upper bound for each CLI invocation
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Runs the CLI with `args`, handing `env` to the child process
    async fn exec(&self, args: &[String], env: &[(String, String)], what: &str) -> Result<Output> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => Err(OrchestratorError::Timeout(format!(
                "{} {} did not finish within {:?}",
                self.binary, what, self.timeout
            ))),
            Ok(Err(e)) => Err(OrchestratorError::RuntimeUnavailable(format!(
                "failed to execute '{}': {}",
                self.binary, e
            ))),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    debug!("{} {} stderr: {}", self.binary, what, stderr.trim());
                }
                Ok(output)
            }
        }
    }

    /// Inspects one container, returning its state and labels
    async fn inspect(&self, container_ref: &str) -> Result<(ContainerState, BTreeMap<String, String>)> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            INSPECT_FORMAT.to_string(),
            container_ref.to_string(),
        ];
        let output = self.exec(&args, &[], "inspect").await?;

        if !output.status.success() {
            return Err(classify_failure(&self.binary, "inspect", &output));
        }

        parse_inspect(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        info!("Creating container {} from image {}", spec.name, spec.image);

        let args = run_args(spec);
        let output = self.exec(&args, &spec.env, "run").await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let err = classify_create_failure(&self.binary, &output);
            warn!("Failed to start container {}: {}", spec.name, err);
            return Err(err);
        }

        // `run -d` prints the container id as its last line (pull progress may precede it)
        let container_id = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                OrchestratorError::Create(format!(
                    "{} run succeeded but printed no container id",
                    self.binary
                ))
            })?;

        info!("Container {} started with ID: {}", spec.name, container_id);
        Ok(container_id)
    }

    async fn inspect_container(&self, container_ref: &str) -> Result<ContainerState> {
        self.inspect(container_ref).await.map(|(state, _)| state)
    }

    async fn remove_container(&self, container_ref: &str) -> Result<()> {
        let args = vec!["rm".to_string(), "-f".to_string(), container_ref.to_string()];
        let output = self.exec(&args, &[], "rm").await?;

        if !output.status.success() {
            return Err(classify_failure(&self.binary, "rm", &output));
        }

        debug!("Removed container {}", container_ref);
        Ok(())
    }

    async fn container_logs(&self, container_ref: &str, tail: usize) -> Result<String> {
        let args = logs_args(container_ref, tail);
        let output = self.exec(&args, &[], "logs").await?;

        if !output.status.success() {
            return Err(classify_failure(&self.binary, "logs", &output));
        }

        // The runtime replays the container's stderr on its own stderr
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    async fn list_managed_containers(&self) -> Result<Vec<ManagedContainer>> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "-q".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("label={}=true", labels::MANAGED),
        ];
        let output = self.exec(&args, &[], "ps").await?;

        if !output.status.success() {
            return Err(classify_failure(&self.binary, "ps", &output));
        }

        let ids: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let mut containers = Vec::with_capacity(ids.len());
        for id in ids {
            match self.inspect(&id).await {
                Ok((state, labels)) => containers.push(ManagedContainer { id, state, labels }),
                // Removed between `ps` and `inspect`
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(containers)
    }

    async fn ping(&self) -> Result<()> {
        let output = self.exec(&["version".to_string()], &[], "version").await?;

        if !output.status.success() {
            return Err(OrchestratorError::RuntimeUnavailable(format!(
                "{} version failed: {}",
                self.binary,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}

fn logs_args(container_ref: &str, tail: usize) -> Vec<String> {
    vec![
        "logs".to_string(),
        "--tail".to_string(),
        tail.to_string(),
        container_ref.to_string(),
    ]
}

/// Arguments of `run` for a spec
///
/// Environment variables are passed by name only (`-e KEY`); the CLI reads their
/// values from its own environment so secrets never show up in the process list.
fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];

    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    for (key, _) in &spec.env {
        args.push("-e".to_string());
        args.push(key.clone());
    }

    args.push(spec.image.clone());

    if let Some(command) = &spec.command {
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(command.clone());
    }

    args
}

fn parse_inspect(stdout: &str) -> Result<(ContainerState, BTreeMap<String, String>)> {
    let line = stdout.trim();
    let mut parts = line.splitn(3, '\t');

    let status = parts.next().unwrap_or_default();
    let exit_code = parts.next().and_then(|c| c.trim().parse::<i64>().ok());
    let labels_json = parts.next().unwrap_or("null");

    if status.is_empty() {
        return Err(OrchestratorError::Runtime(format!(
            "unexpected inspect output: '{}'",
            line
        )));
    }

    let labels: Option<BTreeMap<String, String>> = serde_json::from_str(labels_json.trim())
        .map_err(|e| OrchestratorError::Runtime(format!("unreadable container labels: {}", e)))?;

    Ok((
        ContainerState::from_status(status, exit_code),
        labels.unwrap_or_default(),
    ))
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("no such container")
        || stderr.contains("no such object")
        || stderr.contains("no container with name or id")
}

fn is_unavailable(stderr: &str) -> bool {
    stderr.contains("cannot connect")
        || stderr.contains("is the docker daemon running")
        || stderr.contains("connection refused")
}

fn classify_failure(binary: &str, what: &str, output: &Output) -> OrchestratorError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lower = stderr.to_ascii_lowercase();
    let message = format!(
        "{} {} failed: exit_code={}, stderr='{}'",
        binary,
        what,
        output.status.code().unwrap_or(-1),
        stderr.trim()
    );

    if is_not_found(&lower) {
        OrchestratorError::NotFound(message)
    } else if is_unavailable(&lower) {
        OrchestratorError::RuntimeUnavailable(message)
    } else {
        OrchestratorError::Runtime(message)
    }
}

fn classify_create_failure(binary: &str, output: &Output) -> OrchestratorError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lower = stderr.to_ascii_lowercase();
    let message = format!(
        "{} run failed: exit_code={}, stderr='{}'",
        binary,
        output.status.code().unwrap_or(-1),
        stderr.trim()
    );

    if is_unavailable(&lower) {
        OrchestratorError::RuntimeUnavailable(message)
    } else if lower.contains("pull access denied")
        || lower.contains("manifest unknown")
        || lower.contains("unable to find image")
        || lower.contains("image not known")
        || lower.contains("failed to resolve reference")
        || lower.contains("error pulling image")
    {
        OrchestratorError::ImagePull(message)
    } else {
        OrchestratorError::Create(message)
    }
}
