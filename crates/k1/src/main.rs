mod commands;

use clap::{Parser, Subcommand};
use commands::{CreateArgs, DestroyArgs, OutputMode};
use k1_config::Settings;
use k1_engine::CloudProvider;
use std::fs::OpenOptions;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "k1")]
#[command(about = "Provision a GitOps-managed Kubernetes platform", long_about = None)]
struct Cli {
    /// How progress is rendered
    #[arg(long, value_enum, global = true, default_value_t = OutputMode::Tty)]
    output: OutputMode,

    /// Log filter, e.g. `debug` or `k1_engine=trace`
    #[arg(long, global = true, env = "K1_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision or tear down a cluster on Civo
    Civo {
        #[command(subcommand)]
        action: Action,
    },
    /// Provision or tear down a local k3d cluster
    K3d {
        #[command(subcommand)]
        action: Action,
    },
    /// Print the k1 version
    Version,
}

#[derive(Subcommand)]
enum Action {
    /// Create the cluster, resuming an interrupted install
    Create(CreateArgs),
    /// Revert every completed step and remove the local workspace
    Destroy(DestroyArgs),
}

fn init_logging(level: Option<&str>, output: OutputMode, log_dir: &Path) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    // stdout carries the event stream in json mode, so logs go to a file
    if output == OutputMode::Json {
        let file = std::fs::create_dir_all(log_dir).and_then(|_| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_dir.join("k1.log"))
        });
        if let Ok(file) = file {
            tracing_subscriber::fmt()
                .with_writer(std::sync::Mutex::new(file))
                .with_env_filter(filter)
                .with_ansi(false)
                .init();
            return;
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        println!("k1 {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = Settings::load()?;
    init_logging(cli.log_level.as_deref(), cli.output, &settings.log_dir());

    let (cloud, action) = match cli.command {
        Commands::Civo { action } => (CloudProvider::Civo, action),
        Commands::K3d { action } => (CloudProvider::K3d, action),
        Commands::Version => return Ok(()),
    };

    let succeeded = match action {
        Action::Create(args) => commands::create::handle(cloud, args, settings, cli.output).await?,
        Action::Destroy(args) => {
            commands::destroy::handle(cloud, args, settings, cli.output).await?
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
