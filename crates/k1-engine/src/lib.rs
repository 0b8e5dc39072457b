//! k1 provisioning engine
//!
//! A resumable, checkpoint-driven runner for install plans. Each plan step
//! is an effect against narrow adapter traits; the runner records a
//! checkpoint after every successful step so an interrupted install resumes
//! exactly where it stopped, and walks the reversible steps backwards on
//! destroy.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                    k1 CLI                          │
//! │              (k1 <cloud> create|destroy)           │
//! └──────────────┬─────────────────────────────────────┘
//!                │ Plan (k1-plans)
//! ┌──────────────▼─────────────────────────────────────┐
//! │                  k1-engine                         │
//! │  ┌────────────┐   ┌──────────────┐  ┌───────────┐  │
//! │  │   Runner   │──▶│ Checkpoints  │  │  Reporter │  │
//! │  └─────┬──────┘   │ Vault        │  └───────────┘  │
//! │        │          │ (session file)│                │
//! │        │          └──────────────┘                 │
//! └────────┼───────────────────────────────────────────┘
//!          │ adapter traits
//! ┌────────▼───────────────────────────────────────────┐
//! │   k1-adapters (terraform, kubectl, git, civo, ...) │
//! └────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod checkpoint;
pub mod error;
pub mod event;
#[cfg(any(test, feature = "test-utils"))]
pub mod fakes;
pub mod forward;
pub mod lock;
pub mod plan;
pub mod reporter;
pub mod runner;
pub mod session;
pub mod sink;
pub mod state;
pub mod step;
pub mod vault;
pub mod workspace;

pub use adapter::Adapters;
pub use checkpoint::CheckpointStore;
pub use error::{Error, ErrorKind, Result};
pub use event::{Event, EventError, Phase};
pub use forward::ScopedForward;
pub use plan::{Plan, RESET_WORKSPACE};
pub use reporter::{ProgressReporter, Subscription};
pub use runner::{DestroyOptions, DestroySummary, RunOptions, RunSummary, Runner};
pub use session::{
    CLUSTER_ID_LEN, ClusterType, CloudProvider, DnsProvider, GitProvider, InstallSession,
    SessionParams,
};
pub use sink::{JsonSink, ProgressSink, QuietSink, TtySink, spawn_sink};
pub use step::{Effect, Step, StepContext, StepKind};
pub use vault::{SecretValue, Vault, WriteMode};
pub use workspace::{Workspace, WorkspaceOptions, WorkspacePaths};
