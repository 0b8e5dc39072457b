//! Per-cluster workspace under the workspace root
//!
//! ```text
//! ~/.k1/
//! ├── <cluster>.yaml       session file
//! ├── <cluster>.lock       workspace lock
//! └── <cluster>/
//!     ├── gitops/
//!     ├── metaphor/
//!     ├── terraform/<subsystem>/
//!     ├── tools/
//!     └── kubeconfig
//! ```

use crate::adapter::Clock;
use crate::checkpoint::CheckpointStore;
use crate::error::{Error, Result};
use crate::lock::WorkspaceLock;
use crate::session::validate_cluster_name;
use crate::state::{SharedState, StateFile, lock_state, shared};
use crate::vault::Vault;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    root: PathBuf,
    cluster_name: String,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>, cluster_name: &str) -> Self {
        Self {
            root: root.into(),
            cluster_name: cluster_name.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(format!("{}.yaml", self.cluster_name))
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(format!("{}.lock", self.cluster_name))
    }

    pub fn cluster_dir(&self) -> PathBuf {
        self.root.join(&self.cluster_name)
    }

    pub fn gitops_dir(&self) -> PathBuf {
        self.cluster_dir().join("gitops")
    }

    pub fn metaphor_dir(&self) -> PathBuf {
        self.cluster_dir().join("metaphor")
    }

    /// Terraform data directory of one subsystem (`TF_DATA_DIR`).
    pub fn terraform_dir(&self, subsystem: &str) -> PathBuf {
        self.cluster_dir().join("terraform").join(subsystem)
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.cluster_dir().join("tools")
    }

    pub fn kubeconfig(&self) -> PathBuf {
        self.cluster_dir().join("kubeconfig")
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    /// Locks not refreshed for this long are considered abandoned
    pub lock_stale_after: chrono::Duration,
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self {
            lock_stale_after: chrono::Duration::minutes(60),
        }
    }
}

/// An opened, locked workspace.
pub struct Workspace {
    paths: WorkspacePaths,
    state: SharedState,
    // Held for its Drop
    _lock: Arc<WorkspaceLock>,
}

impl Workspace {
    /// Lock the workspace of `cluster_name` and load its session file.
    pub fn open(root: &Path, cluster_name: &str, options: &WorkspaceOptions) -> Result<Self> {
        validate_cluster_name(cluster_name)?;
        let paths = WorkspacePaths::new(root, cluster_name);

        std::fs::create_dir_all(paths.root()).map_err(|e| {
            Error::io(format!("failed to create {}", paths.root().display()), e)
        })?;

        let lock = Arc::new(WorkspaceLock::acquire(
            paths.lock_file(),
            options.lock_stale_after,
        )?);
        let state = StateFile::load(paths.state_file())?.with_heartbeat(lock.clone());

        tracing::debug!(
            cluster = cluster_name,
            state_file = %paths.state_file().display(),
            "opened workspace"
        );

        Ok(Self {
            paths,
            state: shared(state),
            _lock: lock,
        })
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn vault(&self) -> Vault {
        Vault::new(self.state.clone())
    }

    pub(crate) fn checkpoints(&self, clock: Arc<dyn Clock>) -> CheckpointStore {
        CheckpointStore::new(self.state.clone(), clock)
    }

    /// Remove the cluster directory, then the session file.
    pub(crate) fn reset(&self) -> Result<()> {
        let dir = self.paths.cluster_dir();
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::io(format!("failed to remove {}", dir.display()), e));
            }
        }
        lock_state(&self.state).remove()?;
        tracing::info!(cluster = %self.paths.cluster_name(), "workspace reset");
        Ok(())
    }
}
