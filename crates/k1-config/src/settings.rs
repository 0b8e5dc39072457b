//! User settings
//!
//! Loaded from YAML, then overlaid with environment variables, then with
//! CLI flags by the caller. Every field has a default so an empty or absent
//! file is valid.

use crate::error::{ConfigError, Result};
use crate::{find_config_file, get_workspace_root, non_empty_env};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_GITOPS_TEMPLATE_URL: &str = "https://github.com/kubefirst/gitops-template.git";
pub const DEFAULT_METAPHOR_TEMPLATE_URL: &str =
    "https://github.com/kubefirst/metaphor-frontend-template.git";
pub const DEFAULT_TEMPLATE_BRANCH: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSource {
    pub url: String,
    pub branch: String,
}

impl TemplateSource {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
        }
    }
}

/// Local ports used for port-forwards into the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ports {
    pub argocd: u16,
    pub vault: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            argocd: 8080,
            vault: 8200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub workload_ready_secs: u64,
    pub dns_liveness_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            workload_ready_secs: 1200,
            dns_liveness_secs: 600,
        }
    }
}

/// Pinned versions of the CLI tools downloaded into the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolVersions {
    pub kubectl: String,
    pub terraform: String,
}

impl Default for ToolVersions {
    fn default() -> Self {
        Self {
            kubectl: "v1.25.1".to_string(),
            terraform: "1.3.8".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Empty means "use `K1_HOME` or `~/.k1`"; `K1_HOME` always wins.
    pub workspace_root: PathBuf,
    pub lock_stale_after_minutes: u64,
    pub gitops_template: TemplateSource,
    pub metaphor_template: TemplateSource,
    pub ports: Ports,
    pub timeouts: Timeouts,
    pub tools: ToolVersions,
    /// How many events the progress reporter buffers per subscriber
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::new(),
            lock_stale_after_minutes: 60,
            gitops_template: TemplateSource::new(
                DEFAULT_GITOPS_TEMPLATE_URL,
                DEFAULT_TEMPLATE_BRANCH,
            ),
            metaphor_template: TemplateSource::new(
                DEFAULT_METAPHOR_TEMPLATE_URL,
                DEFAULT_TEMPLATE_BRANCH,
            ),
            ports: Ports::default(),
            timeouts: Timeouts::default(),
            tools: ToolVersions::default(),
            event_buffer: 64,
        }
    }
}

impl Settings {
    /// Discover, parse and overlay the settings for this process.
    pub fn load() -> Result<Self> {
        let root = get_workspace_root()?;
        let mut settings = match find_config_file(&root) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        if non_empty_env(crate::HOME_ENV).is_some() || settings.workspace_root.as_os_str().is_empty()
        {
            settings.workspace_root = root;
        }
        settings.apply_env()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Overlay `K1_LOCK_STALE_MINUTES`, `K1_GITOPS_TEMPLATE_URL` and
    /// `K1_GITOPS_TEMPLATE_BRANCH`.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = non_empty_env("K1_LOCK_STALE_MINUTES") {
            self.lock_stale_after_minutes =
                value.parse().map_err(|_| ConfigError::InvalidEnv {
                    name: "K1_LOCK_STALE_MINUTES".to_string(),
                    value: value.clone(),
                })?;
        }
        let url = non_empty_env("K1_GITOPS_TEMPLATE_URL");
        let branch = non_empty_env("K1_GITOPS_TEMPLATE_BRANCH");
        self.override_gitops_template(url, branch)
    }

    /// Apply `--gitops-template-url` / `--gitops-template-branch`.
    ///
    /// A custom URL must come with a branch; a branch alone switches the
    /// branch of the current template.
    pub fn override_gitops_template(
        &mut self,
        url: Option<String>,
        branch: Option<String>,
    ) -> Result<()> {
        match (url, branch) {
            (Some(url), Some(branch)) => {
                self.gitops_template = TemplateSource::new(url, branch);
            }
            (Some(url), None) => {
                if url != self.gitops_template.url {
                    return Err(ConfigError::TemplateBranchMissing);
                }
            }
            (None, Some(branch)) => self.gitops_template.branch = branch,
            (None, None) => {}
        }
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.workspace_root.join("logs")
    }
}
