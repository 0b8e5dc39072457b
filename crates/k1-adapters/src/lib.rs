//! Adapters that connect the k1 engine to real systems
//!
//! Command line tools (terraform, kubectl, git, gh, k3d, ssh-keygen) run as
//! child processes; Civo, GitLab, Argo CD and Vault are reached over HTTP.
//! Every failure is mapped onto the engine's error kinds in [`error`].

pub mod argocd;
pub mod civo;
pub mod error;
pub mod git;
pub mod github;
pub mod gitlab;
pub mod http;
pub mod k3d;
pub mod keygen;
pub mod kubectl;
pub mod process;
pub mod telemetry;
pub mod terraform;
pub mod tools;
pub mod vault;

pub use error::{AdapterError, Result};

use k1_engine::adapter::{
    CloudApi, EnvSource, GitProviderApi, LocalPortProbe, NoopTelemetry, OsRandom, SystemClock,
    TelemetrySink,
};
use k1_engine::{Adapters, CloudProvider, GitProvider, WorkspacePaths};
use std::sync::Arc;

const TELEMETRY_BUFFER: usize = 64;

/// Which real adapters to wire up for one run.
pub struct AdapterConfig {
    pub cloud: CloudProvider,
    pub git: GitProvider,
    pub paths: WorkspacePaths,
    pub env: Arc<dyn EnvSource>,
    pub telemetry_enabled: bool,
}

/// Build the adapter set for a run. Must be called inside a tokio runtime
/// when telemetry is enabled.
pub fn build(config: AdapterConfig) -> Adapters {
    let AdapterConfig {
        cloud,
        git,
        paths,
        env,
        telemetry_enabled,
    } = config;

    let cloud_api: Arc<dyn CloudApi> = match cloud {
        CloudProvider::Civo => Arc::new(civo::CivoApi::new(env.clone())),
        CloudProvider::K3d => Arc::new(k3d::K3dCli),
    };
    let git_provider: Arc<dyn GitProviderApi> = match git {
        GitProvider::Github => Arc::new(github::GhCli::new(env.clone())),
        GitProvider::Gitlab => Arc::new(gitlab::GitlabApi::new(env.clone())),
    };
    let git_client = match env.var(git.token_env_var()) {
        Some(token) => git::GitCli::with_token(git.host(), &token),
        None => git::GitCli::new(),
    };
    let telemetry: Arc<dyn TelemetrySink> = if telemetry_enabled {
        Arc::new(telemetry::LogTelemetry::spawn(TELEMETRY_BUFFER))
    } else {
        Arc::new(NoopTelemetry)
    };

    let tools_dir = paths.tools_dir();
    Adapters {
        cloud: cloud_api,
        git_provider,
        git: Arc::new(git_client),
        terraform: Arc::new(terraform::TerraformCli::new(tools_dir.clone())),
        kubernetes: Arc::new(kubectl::Kubectl::new(tools_dir, paths.kubeconfig())),
        keygen: Arc::new(keygen::SshKeygen),
        tools: Arc::new(tools::HttpToolInstaller::new()),
        argocd: Arc::new(argocd::ArgoCdHttp::new()),
        vault: Arc::new(vault::VaultHttp::new()),
        clock: Arc::new(SystemClock),
        random: Arc::new(OsRandom),
        telemetry,
        env,
        ports: Arc::new(LocalPortProbe),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k1_engine::fakes::FakeEnv;

    #[tokio::test]
    async fn test_build_wires_local_adapters() {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(FakeEnv::default());
        env.set("GITHUB_TOKEN", "ghp-1");
        let adapters = build(AdapterConfig {
            cloud: CloudProvider::K3d,
            git: GitProvider::Github,
            paths: WorkspacePaths::new(dir.path(), "kf"),
            env,
            telemetry_enabled: true,
        });

        assert!(adapters.cloud.get_quotas("local", &["compute"]).await.unwrap().is_empty());
        assert_eq!(adapters.env.var("GITHUB_TOKEN").as_deref(), Some("ghp-1"));
        assert_eq!(adapters.random.string(8).len(), 8);
    }
}
