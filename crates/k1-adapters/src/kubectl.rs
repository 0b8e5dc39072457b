//! Cluster access through `kubectl`

use crate::error::AdapterError;
use crate::process::{Cmd, resolve_tool};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k1_engine::adapter::{
    ForwardTarget, KubernetesApi, PortForwardHandle, WorkloadKind, WorkloadRef,
};
use k1_engine::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Child;

const FORWARD_READY_TIMEOUT: Duration = Duration::from_secs(20);
const FORWARD_POLL: Duration = Duration::from_millis(250);

pub struct Kubectl {
    tools_dir: PathBuf,
    kubeconfig: PathBuf,
}

impl Kubectl {
    pub fn new(tools_dir: impl Into<PathBuf>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: tools_dir.into(),
            kubeconfig: kubeconfig.into(),
        }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(resolve_tool(&self.tools_dir, "kubectl"))
            .arg("--kubeconfig")
            .arg(self.kubeconfig.to_string_lossy())
    }
}

#[derive(Debug, Deserialize)]
struct SecretObject {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

/// Decode the `data` map of `kubectl get secret -o json`.
fn decode_secret(json: &str) -> std::result::Result<BTreeMap<String, String>, AdapterError> {
    let secret: SecretObject = serde_json::from_str(json)?;
    secret
        .data
        .into_iter()
        .map(|(key, encoded)| {
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| AdapterError::Unexpected(format!("secret key {}: {}", key, e)))?;
            Ok((key, String::from_utf8_lossy(&bytes).into_owned()))
        })
        .collect()
}

/// What `kubectl wait` waits on for a workload.
fn wait_args(workload: &WorkloadRef, timeout: Duration) -> Vec<String> {
    let (resource, condition) = match workload.kind {
        WorkloadKind::Deployment => ("deployment", "condition=Available"),
        // StatefulSets have no ready condition of their own; wait on their pods.
        WorkloadKind::StatefulSet => ("pod", "condition=Ready"),
    };
    vec![
        "wait".to_string(),
        resource.to_string(),
        "-n".to_string(),
        workload.namespace.clone(),
        "-l".to_string(),
        workload.selector.clone(),
        format!("--for={}", condition),
        format!("--timeout={}s", timeout.as_secs().max(1)),
    ]
}

#[async_trait]
impl KubernetesApi for Kubectl {
    async fn apply(&self, manifest: &str) -> Result<()> {
        self.cmd().args(["apply", "-f", "-"]).stdin(manifest).run().await?;
        Ok(())
    }

    async fn apply_kustomization(&self, source: &str) -> Result<()> {
        self.cmd().args(["apply", "-k", source]).run().await?;
        Ok(())
    }

    async fn read_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let out = self
            .cmd()
            .args(["get", "secret", name, "-n", namespace, "-o", "json"])
            .run()
            .await?;
        Ok(decode_secret(&out)?)
    }

    async fn wait_for_workload_ready(&self, workload: &WorkloadRef, timeout: Duration) -> Result<()> {
        tracing::debug!(workload = %workload, "waiting for workload");
        // `kubectl wait` fails at once while no object matches the selector yet.
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.cmd().args(wait_args(workload, remaining)).run().await {
                Ok(_) => return Ok(()),
                Err(AdapterError::CommandFailed { stderr, .. })
                    if stderr.contains("no matching resources")
                        && remaining > Duration::from_secs(5) =>
                {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Err(AdapterError::CommandFailed { stderr, .. })
                    if stderr.contains("timed out") =>
                {
                    return Err(Error::Timeout(format!("{} to become ready", workload)));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn port_forward(&self, target: &ForwardTarget) -> Result<Box<dyn PortForwardHandle>> {
        let cmd = self.cmd().args([
            "port-forward".to_string(),
            "-n".to_string(),
            target.namespace.clone(),
            target.target.clone(),
            format!("{}:{}", target.local_port, target.remote_port),
        ]);
        let mut command = cmd.command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|e| cmd.spawn_error(e))?;

        let deadline = tokio::time::Instant::now() + FORWARD_READY_TIMEOUT;
        loop {
            if let Some(status) = child.try_wait().map_err(AdapterError::Io)? {
                let stderr = match child.stderr.take() {
                    Some(mut pipe) => {
                        let mut buf = String::new();
                        let _ = tokio::io::AsyncReadExt::read_to_string(&mut pipe, &mut buf).await;
                        buf
                    }
                    None => String::new(),
                };
                return Err(AdapterError::CommandFailed {
                    program: "kubectl port-forward".into(),
                    status: status.to_string(),
                    stderr: stderr.trim().to_string(),
                }
                .into());
            }
            if tokio::net::TcpStream::connect((Ipv4Addr::LOCALHOST, target.local_port))
                .await
                .is_ok()
            {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = child.start_kill();
                return Err(Error::Timeout(format!(
                    "port-forward to {}/{} on localhost:{}",
                    target.namespace, target.target, target.local_port
                )));
            }
            tokio::time::sleep(FORWARD_POLL).await;
        }

        tracing::debug!(target = %target.target, port = target.local_port, "port-forward open");
        Ok(Box::new(KubectlForward {
            child: Some(child),
            port: target.local_port,
        }))
    }
}

/// A running `kubectl port-forward` child.
struct KubectlForward {
    child: Option<Child>,
    port: u16,
}

#[async_trait]
impl PortForwardHandle for KubectlForward {
    fn local_port(&self) -> u16 {
        self.port
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child
                .kill()
                .await
                .map_err(|e| Error::io("stopping port-forward", e))?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

impl Drop for KubectlForward {
    fn drop(&mut self) {
        self.release();
    }
}

/// Write a kubeconfig file handed back by a provider.
pub async fn write_kubeconfig(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| Error::io(format!("writing {}", path.display()), e))
}
