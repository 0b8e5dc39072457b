//! Step runner
//!
//! Drives a plan one step at a time. A step starts only after the previous
//! step's checkpoint is durable; a failed step stops the run and is retried
//! by the next invocation.

use crate::adapter::{Adapters, TelemetryAttrs};
use crate::checkpoint::CheckpointStore;
use crate::error::{Error, Result};
use crate::event::{Event, Phase};
use crate::plan::{Plan, RESET_WORKSPACE};
use crate::reporter::ProgressReporter;
use crate::session::SessionParams;
use crate::step::{Effect, Step, StepContext};
use crate::vault::Vault;
use crate::workspace::{Workspace, WorkspacePaths};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Environment variable tagging telemetry with a team identifier.
pub const TEAM_ENV_VAR: &str = "K1_TEAM";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Execute nothing and write nothing
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
    pub dry_run: bool,
    /// Keep the workspace when any inverse failed
    pub strict: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    /// Steps a dry run would have executed
    pub pending: Vec<String>,
}

#[derive(Debug, Default)]
pub struct DestroySummary {
    pub reverted: Vec<String>,
    pub skipped: Vec<String>,
    pub pending: Vec<String>,
    /// Recorded inverse failures, each tagged with its step key
    pub failures: Vec<Error>,
    pub workspace_reset: bool,
}

impl DestroySummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Runner {
    workspace: Workspace,
    checkpoints: CheckpointStore,
    vault: Vault,
    adapters: Adapters,
    reporter: ProgressReporter,
}

impl Runner {
    pub fn new(workspace: Workspace, adapters: Adapters, reporter: ProgressReporter) -> Self {
        let checkpoints = workspace.checkpoints(adapters.clock.clone());
        let vault = workspace.vault();
        Self {
            workspace,
            checkpoints,
            vault,
            adapters,
            reporter,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn paths(&self) -> &WorkspacePaths {
        self.workspace.paths()
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Run every step of `plan` that is not already done.
    ///
    /// Returns the first step failure, tagged with its key.
    pub async fn install(
        &self,
        plan: &Plan,
        params: &SessionParams,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        plan.validate()?;
        params.validate()?;
        if !plan.applies_to(params) {
            return Err(Error::precondition(format!(
                "plan `{}` does not apply to cloud `{}`",
                plan.name(),
                params.cloud_provider
            )));
        }
        if let Some(session) = self.vault.session()
            && !session.matches(params)
        {
            return Err(Error::conflict_with(
                format!(
                    "cluster `{}` already has an install session with different settings",
                    params.cluster_name
                ),
                vec![
                    "re-run with the original flags to resume".to_string(),
                    format!(
                        "or run `k1 {} destroy --cluster-name {}` first",
                        session.cloud_provider, session.cluster_name
                    ),
                ],
            ));
        }

        tracing::info!(plan = plan.name(), cluster = %params.cluster_name, dry_run = options.dry_run, "starting install");

        let mut summary = RunSummary::default();
        let mut announced = false;

        for step in plan.steps() {
            let key = step.key();

            if self.checkpoints.is_done(key) {
                tracing::debug!(step = key, "already done");
                self.publish(Event::new(key, Phase::Skipped, self.adapters.clock.now()));
                summary.skipped.push(key.to_string());
                continue;
            }

            if options.dry_run {
                tracing::info!(step = key, kind = %step.kind(), "would run");
                summary.pending.push(key.to_string());
                continue;
            }

            if !announced {
                self.telemetry("install-started", params);
                announced = true;
            }

            if cancel.is_cancelled() {
                return Err(self.fail(key, Error::Cancelled, params));
            }

            tracing::info!(step = key, kind = %step.kind(), "running");
            self.publish(Event::new(key, Phase::Started, self.adapters.clock.now()));
            self.telemetry(&format!("{}-started", key), params);

            if let Err(e) = self.run_effect(step.effect(), key, params, cancel).await {
                return Err(self.fail(key, e, params));
            }

            // Checkpoint writes are synchronous and never interrupted.
            if let Err(e) = self.checkpoints.mark(key) {
                return Err(self.fail(key, e, params));
            }

            tracing::info!(step = key, "done");
            self.publish(Event::new(key, Phase::Succeeded, self.adapters.clock.now()));
            self.telemetry(&format!("{}-completed", key), params);
            summary.executed.push(key.to_string());
        }

        if announced {
            self.telemetry("install-completed", params);
        }
        Ok(summary)
    }

    /// Revert the reversible steps of `plan` in reverse order, then reset
    /// the workspace.
    ///
    /// Inverse failures are recorded in the summary and the walk continues,
    /// except for `io`/`internal` failures and cancellation, which abort.
    pub async fn destroy(
        &self,
        plan: &Plan,
        options: &DestroyOptions,
        cancel: &CancellationToken,
    ) -> Result<DestroySummary> {
        plan.validate()?;
        let params = self.vault.session().map(|s| s.params());

        tracing::info!(plan = plan.name(), cluster = %self.paths().cluster_name(), dry_run = options.dry_run, "starting destroy");

        let mut summary = DestroySummary::default();
        let mut announced = false;

        for step in plan.steps().iter().rev() {
            let key = step.key();
            let inverse = match step.inverse() {
                Some(inverse) if self.checkpoints.is_done(key) => inverse,
                _ => {
                    self.publish(Event::new(key, Phase::Skipped, self.adapters.clock.now()));
                    summary.skipped.push(key.to_string());
                    continue;
                }
            };

            if options.dry_run {
                tracing::info!(step = key, "would revert");
                summary.pending.push(key.to_string());
                continue;
            }

            let Some(params) = params.as_ref() else {
                let err = Error::internal(format!(
                    "checkpoint `{}` is done but no install session exists",
                    key
                ));
                return Err(self.fail_plain(key, err));
            };

            if !announced {
                self.telemetry("destroy-started", params);
                announced = true;
            }

            if cancel.is_cancelled() {
                return Err(self.fail(key, Error::Cancelled, params));
            }

            tracing::info!(step = key, "reverting");
            self.publish(Event::new(key, Phase::Started, self.adapters.clock.now()));
            self.telemetry(&format!("{}-started", key), params);

            match self.run_effect(inverse, key, params, cancel).await {
                Ok(()) => {
                    if let Err(e) = self.checkpoints.clear(key) {
                        return Err(self.fail(key, e, params));
                    }
                    self.publish(Event::new(key, Phase::Succeeded, self.adapters.clock.now()));
                    self.telemetry(&format!("{}-completed", key), params);
                    summary.reverted.push(key.to_string());
                }
                Err(e) if e.kind().aborts_destroy() || e.is_cancelled() => {
                    return Err(self.fail(key, e, params));
                }
                Err(e) => {
                    let err = self.fail(key, e, params);
                    tracing::warn!(step = key, "continuing destroy after failure");
                    summary.failures.push(err);
                }
            }
        }

        if options.dry_run {
            summary.pending.push(RESET_WORKSPACE.to_string());
            return Ok(summary);
        }

        if options.strict && !summary.is_success() {
            tracing::warn!("keeping workspace because an inverse failed in strict mode");
            self.publish(Event::new(RESET_WORKSPACE, Phase::Skipped, self.adapters.clock.now()));
            summary.skipped.push(RESET_WORKSPACE.to_string());
            return Ok(summary);
        }

        self.publish(Event::new(RESET_WORKSPACE, Phase::Started, self.adapters.clock.now()));
        if let Err(e) = self.workspace.reset() {
            return Err(self.fail_plain(RESET_WORKSPACE, e));
        }
        self.publish(Event::new(RESET_WORKSPACE, Phase::Succeeded, self.adapters.clock.now()));
        summary.workspace_reset = true;

        if let Some(params) = params.as_ref()
            && announced
        {
            self.telemetry("destroy-completed", params);
        }
        Ok(summary)
    }

    /// Remove the workspace without walking a plan. Used when there is no
    /// install session to destroy.
    pub fn reset_workspace(&self) -> Result<()> {
        self.publish(Event::new(RESET_WORKSPACE, Phase::Started, self.adapters.clock.now()));
        if let Err(e) = self.workspace.reset() {
            return Err(self.fail_plain(RESET_WORKSPACE, e));
        }
        self.publish(Event::new(RESET_WORKSPACE, Phase::Succeeded, self.adapters.clock.now()));
        Ok(())
    }

    async fn run_effect(
        &self,
        effect: &Arc<dyn Effect>,
        key: &str,
        params: &SessionParams,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ctx = StepContext {
            step_key: key,
            params,
            adapters: &self.adapters,
            vault: &self.vault,
            paths: self.workspace.paths(),
            cancel,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = effect.run(&ctx) => res,
        }
    }

    /// Report a step failure and tag the error with the step key.
    fn fail(&self, key: &str, err: Error, params: &SessionParams) -> Error {
        let err = self.fail_plain(key, err);
        self.telemetry(&format!("{}-failed", key), params);
        err
    }

    fn fail_plain(&self, key: &str, err: Error) -> Error {
        let message = self.vault.redact(&err.untagged().to_string());
        tracing::warn!(step = key, kind = %err.kind(), "step failed: {}", message);
        self.publish(Event::failed(
            key,
            self.adapters.clock.now(),
            err.kind(),
            message,
        ));
        err.tagged(key)
    }

    fn publish(&self, event: Event) {
        self.reporter.publish(event);
    }

    fn telemetry(&self, event_name: &str, params: &SessionParams) {
        let attrs = self.telemetry_attrs(params);
        self.adapters.telemetry.emit(event_name, &attrs);
    }

    fn telemetry_attrs(&self, params: &SessionParams) -> TelemetryAttrs {
        let cluster_id = self
            .vault
            .session()
            .map(|s| s.cluster_id)
            .unwrap_or_default();
        TelemetryAttrs {
            cluster_id,
            cluster_type: params.cluster_type.as_str().to_string(),
            cloud_provider: params.cloud_provider.as_str().to_string(),
            git_provider: params.git_provider.as_str().to_string(),
            domain_name: params.domain_name.clone(),
            k1_team: self.adapters.env.var(TEAM_ENV_VAR).unwrap_or_default(),
            cli_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Keys of the reversible steps that are still marked done.
pub fn remaining_reversibles(plan: &Plan, checkpoints: &CheckpointStore) -> Vec<String> {
    plan.steps()
        .iter()
        .filter(|s: &&Step| s.is_reversible() && checkpoints.is_done(s.key()))
        .map(|s| s.key().to_string())
        .collect()
}
