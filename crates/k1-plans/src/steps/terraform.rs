use super::tolerate_missing;
use crate::tfenv::{self, Subsystem};
use crate::{PlanOptions, names};
use async_trait::async_trait;
use k1_engine::adapter::{EnvMap, ForwardTarget};
use k1_engine::vault::names as secret;
use k1_engine::{Effect, Error, GitProvider, Result, StepContext, WriteMode};
use std::path::PathBuf;
use std::sync::Arc;

const VAULT_REMOTE_PORT: u16 = 8200;

fn vault_forward(options: &PlanOptions) -> ForwardTarget {
    ForwardTarget::new(
        names::VAULT_NAMESPACE,
        "pod/vault-0",
        options.ports.vault,
        VAULT_REMOTE_PORT,
    )
}

/// `<gitops>/terraform/<subsystem>`; it must exist by the time terraform runs.
fn entry_dir(ctx: &StepContext<'_>, subsystem: Subsystem) -> Result<PathBuf> {
    let session = ctx.session()?;
    let dir = ctx
        .paths
        .gitops_dir()
        .join("terraform")
        .join(subsystem.dir_name(&session));
    if !dir.is_dir() {
        return Err(Error::NotFound(format!(
            "terraform entrypoint {}",
            dir.display()
        )));
    }
    Ok(dir)
}

#[derive(Clone, Copy)]
enum Action {
    Apply,
    Destroy,
}

async fn run_terraform(
    ctx: &StepContext<'_>,
    options: &PlanOptions,
    subsystem: Subsystem,
    action: Action,
) -> Result<()> {
    let dir = entry_dir(ctx, subsystem)?;
    let invoke = |env: EnvMap| {
        let dir = dir.clone();
        async move {
            let terraform = &ctx.adapters.terraform;
            match action {
                Action::Apply => terraform.init_apply(&dir, &env).await,
                Action::Destroy => terraform.init_destroy(&dir, &env).await,
            }
        }
    };

    if subsystem.needs_vault_forward() {
        ctx.with_forward(&vault_forward(options), |url| async move {
            let env = tfenv::build(ctx, subsystem, Some(url.as_str()))?;
            invoke(env).await
        })
        .await
    } else {
        let env = tfenv::build(ctx, subsystem, None)?;
        ctx.cancellable(invoke(env)).await
    }
}

/// `terraform init && terraform apply` for one subsystem.
pub struct TerraformApply {
    pub subsystem: Subsystem,
    pub options: Arc<PlanOptions>,
}

#[async_trait]
impl Effect for TerraformApply {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        run_terraform(ctx, &self.options, self.subsystem, Action::Apply).await?;
        if self.subsystem == Subsystem::Git {
            // The repositories now belong to this session.
            ctx.vault.put(
                secret::GIT_MANAGED_REPOS,
                names::MANAGED_REPOS.join(","),
                WriteMode::Overwrite,
            )?;
        }
        tracing::info!(subsystem = ?self.subsystem, "terraform applied");
        Ok(())
    }
}

/// Inverse of [`TerraformApply`].
pub struct TerraformDestroy {
    pub subsystem: Subsystem,
    pub options: Arc<PlanOptions>,
}

impl TerraformDestroy {
    /// Resources the git provider holds outside terraform's state.
    async fn remove_git_extras(&self, ctx: &StepContext<'_>) -> Result<()> {
        let session = ctx.session()?;
        let provider = &ctx.adapters.git_provider;
        match session.git_provider {
            GitProvider::Github => {
                let url = names::atlantis_webhook_url(&session.domain_name);
                tolerate_missing(
                    provider
                        .delete_webhook(&session.git_owner, names::GITOPS_REPO, &url)
                        .await,
                    "atlantis webhook",
                )
            }
            GitProvider::Gitlab => {
                let key = names::kbot_ssh_key_name(&session);
                tolerate_missing(provider.delete_ssh_key(&key).await, &key)
            }
        }
    }
}

#[async_trait]
impl Effect for TerraformDestroy {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        if self.subsystem == Subsystem::Git {
            self.remove_git_extras(ctx).await?;
        }
        run_terraform(ctx, &self.options, self.subsystem, Action::Destroy).await?;
        tracing::info!(subsystem = ?self.subsystem, "terraform destroyed");
        Ok(())
    }
}
