pub mod create;
pub mod destroy;

use clap::{Args, ValueEnum};
use colored::Colorize;
use k1_adapters::AdapterConfig;
use k1_config::Settings;
use k1_engine::adapter::ProcessEnv;
use k1_engine::{
    ClusterType, CloudProvider, DnsProvider, Error, GitProvider, JsonSink, ProgressReporter,
    ProgressSink, QuietSink, Runner, TtySink, Workspace, WorkspaceOptions, spawn_sink,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Spinners on the terminal
    Tty,
    /// One JSON event per line on stdout
    Json,
    /// Nothing but the final result
    Quiet,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum GitProviderArg {
    Github,
    Gitlab,
}

impl From<GitProviderArg> for GitProvider {
    fn from(arg: GitProviderArg) -> Self {
        match arg {
            GitProviderArg::Github => GitProvider::Github,
            GitProviderArg::Gitlab => GitProvider::Gitlab,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ClusterTypeArg {
    Mgmt,
    Workload,
}

impl From<ClusterTypeArg> for ClusterType {
    fn from(arg: ClusterTypeArg) -> Self {
        match arg {
            ClusterTypeArg::Mgmt => ClusterType::Mgmt,
            ClusterTypeArg::Workload => ClusterType::Workload,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DnsProviderArg {
    Civo,
    Cloudflare,
}

impl From<DnsProviderArg> for DnsProvider {
    fn from(arg: DnsProviderArg) -> Self {
        match arg {
            DnsProviderArg::Civo => DnsProvider::Civo,
            DnsProviderArg::Cloudflare => DnsProvider::Cloudflare,
        }
    }
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Name of the cluster; also names the local workspace
    #[arg(long)]
    pub cluster_name: String,

    /// Domain the platform is served under (k3d: kubefirst.dev)
    #[arg(long)]
    pub domain_name: Option<String>,

    /// Cloud region (k3d: local)
    #[arg(long)]
    pub cloud_region: Option<String>,

    /// Organization or user that owns the gitops repositories
    #[arg(long)]
    pub git_owner: String,

    #[arg(long, value_enum, default_value = "github")]
    pub git_provider: GitProviderArg,

    #[arg(long, value_enum, default_value = "mgmt")]
    pub cluster_type: ClusterTypeArg,

    #[arg(long, value_enum, default_value = "civo")]
    pub dns_provider: DnsProviderArg,

    /// Show which steps would run without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Use this password for the kbot user instead of generating one
    #[arg(long)]
    pub kbot_password: Option<String>,

    /// Gitops template repository; requires --gitops-template-branch
    #[arg(long)]
    pub gitops_template_url: Option<String>,

    #[arg(long)]
    pub gitops_template_branch: Option<String>,
}

#[derive(Debug, Args)]
pub struct DestroyArgs {
    #[arg(long)]
    pub cluster_name: String,

    /// Keep the local workspace when any resource failed to delete
    #[arg(long)]
    pub strict: bool,

    /// Show which steps would be reverted without reverting them
    #[arg(long)]
    pub dry_run: bool,
}

/// Lock the cluster workspace and wire real adapters to it.
///
/// `git` decides which provider adapter is built; `None` takes it from the
/// existing install session, falling back to GitHub.
pub fn open_runner(
    settings: &Settings,
    cloud: CloudProvider,
    cluster_name: &str,
    git: Option<GitProvider>,
) -> anyhow::Result<Runner> {
    let options = WorkspaceOptions {
        lock_stale_after: chrono::Duration::minutes(settings.lock_stale_after_minutes as i64),
    };
    let workspace = Workspace::open(&settings.workspace_root, cluster_name, &options)?;
    let git = git
        .or_else(|| workspace.vault().session().map(|s| s.git_provider))
        .unwrap_or(GitProvider::Github);

    let adapters = k1_adapters::build(AdapterConfig {
        cloud,
        git,
        paths: workspace.paths().clone(),
        env: Arc::new(ProcessEnv),
        telemetry_enabled: true,
    });
    let reporter = ProgressReporter::new(settings.event_buffer);
    tracing::debug!(cluster = cluster_name, cloud = %cloud, git = %git, "runner ready");
    Ok(Runner::new(workspace, adapters, reporter))
}

pub fn start_sink(runner: &Runner, output: OutputMode) -> JoinHandle<()> {
    let sink: Box<dyn ProgressSink> = match output {
        OutputMode::Tty => Box::new(TtySink::new()),
        OutputMode::Json => Box::new(JsonSink::new(std::io::stdout())),
        OutputMode::Quiet => Box::new(QuietSink),
    };
    spawn_sink(runner.reporter(), sink)
}

/// Close the reporter and wait for the sink to drain.
pub async fn finish_sink(runner: &Runner, sink: JoinHandle<()>) {
    runner.reporter().close();
    if let Err(e) = sink.await {
        tracing::debug!(error = %e, "progress sink ended abnormally");
    }
}

/// Cancel `token` on the first Ctrl-C.
pub fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "interrupt received, stopping after the current operation".yellow());
            token.cancel();
        }
    });
}

/// One line per failed step: key, kind and message.
pub fn failure_line(runner: &Runner, err: &Error) -> String {
    let key = err.step_key().unwrap_or("-");
    let message = runner.vault().redact(&err.untagged().to_string());
    format!("{} {} [{}] {}", "✗".red(), key.bold(), err.kind(), message)
}
