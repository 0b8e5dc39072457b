//! External adapter contracts
//!
//! The engine only talks to the outside world through these traits.
//! Implementations translate their native errors into [`crate::Error`].

mod system;

pub use system::{LocalPortProbe, NoopTelemetry, OsRandom, ProcessEnv, SystemClock};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Flat environment handed to terraform.
pub type EnvMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub location: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ObjectStoreCredential {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for ObjectStoreCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreCredential")
            .field("access_key", &self.access_key)
            .field("secret_key", &"******")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub name: String,
    pub region: String,
    pub node_count: u32,
    pub node_type: String,
    /// Where the adapter writes the kubeconfig of the new cluster
    pub kubeconfig_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub name: String,
    pub used: u64,
    pub limit: u64,
}

#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Idempotent on `name`.
    async fn create_object_store_bucket(&self, name: &str, region: &str) -> Result<BucketInfo>;

    async fn delete_object_store_bucket(&self, name: &str, region: &str) -> Result<()>;

    /// Idempotent on `name`.
    async fn create_object_store_credential(
        &self,
        name: &str,
        region: &str,
    ) -> Result<ObjectStoreCredential>;

    async fn delete_object_store_credential(&self, name: &str, region: &str) -> Result<()>;

    async fn resolve_dns_zone(&self, domain: &str) -> Result<String>;

    /// Write a TXT record and poll for it. `false` when it never showed up.
    async fn probe_dns_liveness(&self, domain: &str, zone_id: &str) -> Result<bool>;

    /// Returns once the cluster is reachable or the provider reports a terminal state.
    async fn create_kubernetes_cluster(&self, spec: &ClusterSpec) -> Result<()>;

    async fn delete_kubernetes_cluster(&self, name: &str) -> Result<()>;

    async fn get_quotas(
        &self,
        region: &str,
        services: &[&str],
    ) -> Result<BTreeMap<String, Vec<QuotaUsage>>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUser {
    pub login: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepoStatus {
    pub exists: bool,
    pub forbidden: bool,
}

#[async_trait]
pub trait GitProviderApi: Send + Sync {
    async fn user_info(&self, token: &str) -> Result<GitUser>;

    async fn check_repo_exists(&self, owner: &str, name: &str) -> Result<RepoStatus>;

    async fn check_team_exists(&self, owner: &str, team: &str) -> Result<bool>;

    async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<()>;

    async fn delete_ssh_key(&self, name: &str) -> Result<()>;

    async fn delete_webhook(&self, owner: &str, repo: &str, url: &str) -> Result<()>;

    async fn create_deploy_token(&self, owner: &str, repo: &str, scopes: &[&str])
    -> Result<String>;
}

/// Local git plumbing for the template repositories.
#[async_trait]
pub trait GitClient: Send + Sync {
    async fn clone_repo(&self, url: &str, branch: &str, dir: &Path) -> Result<()>;

    /// Drop any existing history and start a fresh one pointing at `url`.
    async fn init_with_remote(&self, dir: &Path, remote_name: &str, url: &str) -> Result<()>;

    async fn commit_all(&self, dir: &Path, message: &str) -> Result<()>;

    async fn push(&self, dir: &Path, remote_name: &str) -> Result<()>;

    /// Whether the remote already has the local `HEAD`.
    async fn remote_has_head(&self, dir: &Path, remote_name: &str) -> Result<bool>;
}

#[async_trait]
pub trait TerraformRunner: Send + Sync {
    async fn init_apply(&self, dir: &Path, env: &EnvMap) -> Result<()>;

    async fn init_destroy(&self, dir: &Path, env: &EnvMap) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub selector: String,
    pub namespace: String,
}

impl WorkloadRef {
    pub fn new(kind: WorkloadKind, selector: &str, namespace: &str) -> Self {
        Self {
            kind,
            selector: selector.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} in {}", self.kind.as_str(), self.selector, self.namespace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub namespace: String,
    pub target: String,
    pub local_port: u16,
    pub remote_port: u16,
}

impl ForwardTarget {
    pub fn new(namespace: &str, target: &str, local_port: u16, remote_port: u16) -> Self {
        Self {
            namespace: namespace.to_string(),
            target: target.to_string(),
            local_port,
            remote_port,
        }
    }
}

/// A live port-forward. See [`crate::forward::ScopedForward`] for the
/// guard steps use.
#[async_trait]
pub trait PortForwardHandle: Send {
    fn local_port(&self) -> u16;

    /// Tear the forward down and wait for it to exit.
    async fn close(self: Box<Self>) -> Result<()>;

    /// Best-effort synchronous teardown, used when the guard is dropped.
    fn release(&mut self);
}

#[async_trait]
pub trait KubernetesApi: Send + Sync {
    async fn apply(&self, manifest: &str) -> Result<()>;

    /// Apply a kustomization directory or remote URL.
    async fn apply_kustomization(&self, source: &str) -> Result<()>;

    /// Fails with `not-found` when the secret does not exist.
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;

    async fn wait_for_workload_ready(&self, workload: &WorkloadRef, timeout: Duration)
    -> Result<()>;

    async fn port_forward(&self, target: &ForwardTarget) -> Result<Box<dyn PortForwardHandle>>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"******")
            .field("public_key", &self.public_key)
            .finish()
    }
}

#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn generate_ssh_keypair(&self) -> Result<KeyPair>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub version: String,
}

impl ToolSpec {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}

#[async_trait]
pub trait ToolInstaller: Send + Sync {
    /// Make `tool` available in `dest_dir`, returning its path.
    async fn ensure(&self, tool: &ToolSpec, dest_dir: &Path) -> Result<PathBuf>;
}

#[async_trait]
pub trait ArgoCdApi: Send + Sync {
    async fn session_token(&self, base_url: &str, username: &str, password: &str)
    -> Result<String>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct VaultInit {
    pub root_token: String,
    pub unseal_keys: Vec<String>,
}

impl fmt::Debug for VaultInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultInit")
            .field("root_token", &"******")
            .field("unseal_keys", &self.unseal_keys.len())
            .finish()
    }
}

#[async_trait]
pub trait VaultApi: Send + Sync {
    async fn is_initialized(&self, base_url: &str) -> Result<bool>;

    async fn initialize(&self, base_url: &str) -> Result<VaultInit>;
}

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

pub trait RandomSource: Send + Sync {
    /// `n` alphanumeric characters.
    fn string(&self, n: usize) -> String;
}

/// Non-secret attributes attached to every telemetry event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryAttrs {
    pub cluster_id: String,
    pub cluster_type: String,
    pub cloud_provider: String,
    pub git_provider: String,
    pub domain_name: String,
    pub k1_team: String,
    pub cli_version: String,
}

/// Must not block and must not carry secret values.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event_name: &str, attrs: &TelemetryAttrs);
}

pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

pub trait PortProbe: Send + Sync {
    /// Whether `port` can be bound on localhost right now.
    fn is_free(&self, port: u16) -> bool;
}

/// Everything a plan may call out to.
#[derive(Clone)]
pub struct Adapters {
    pub cloud: Arc<dyn CloudApi>,
    pub git_provider: Arc<dyn GitProviderApi>,
    pub git: Arc<dyn GitClient>,
    pub terraform: Arc<dyn TerraformRunner>,
    pub kubernetes: Arc<dyn KubernetesApi>,
    pub keygen: Arc<dyn KeyGenerator>,
    pub tools: Arc<dyn ToolInstaller>,
    pub argocd: Arc<dyn ArgoCdApi>,
    pub vault: Arc<dyn VaultApi>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn RandomSource>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub env: Arc<dyn EnvSource>,
    pub ports: Arc<dyn PortProbe>,
}
