use crate::{PlanOptions, manifests, names};
use async_trait::async_trait;
use k1_engine::adapter::{ForwardTarget, WorkloadKind, WorkloadRef};
use k1_engine::vault::names as secret;
use k1_engine::{Effect, Error, Result, StepContext, WriteMode};
use std::sync::Arc;
use std::time::Duration;

const VAULT_REMOTE_PORT: u16 = 8200;
const ROOT_TOKEN_KEY: &str = "root-token";

/// Initialize the in-cluster vault and keep its root material.
///
/// The root token and unseal keys are only returned once, by the call that
/// initializes; they go to the local vault before anything else so a crash
/// right after initialization cannot lose them.
pub struct VaultInitialized {
    pub options: Arc<PlanOptions>,
}

impl VaultInitialized {
    async fn converge(&self, ctx: &StepContext<'_>, base_url: &str) -> Result<()> {
        let api = &ctx.adapters.vault;
        if !api.is_initialized(base_url).await? {
            let init = api.initialize(base_url).await?;
            ctx.vault
                .put(secret::VAULT_ROOT_TOKEN, &init.root_token, WriteMode::Overwrite)?;
            ctx.vault.put(
                secret::VAULT_UNSEAL_KEYS,
                init.unseal_keys.join("\n"),
                WriteMode::Overwrite,
            )?;
            tracing::info!(keys = init.unseal_keys.len(), "vault initialized");
            return self.write_unseal_secret(ctx, &init.root_token, &init.unseal_keys).await;
        }

        match ctx.vault.get_string(secret::VAULT_ROOT_TOKEN)? {
            Some(root_token) => {
                let keys: Vec<String> = ctx
                    .vault
                    .get_string(secret::VAULT_UNSEAL_KEYS)?
                    .unwrap_or_default()
                    .lines()
                    .map(str::to_string)
                    .collect();
                self.write_unseal_secret(ctx, &root_token, &keys).await
            }
            None => {
                // Initialized by an earlier run that crashed before the
                // token was kept locally; the cluster secret still has it.
                let stored = ctx
                    .adapters
                    .kubernetes
                    .read_secret(names::VAULT_NAMESPACE, names::VAULT_UNSEAL_SECRET)
                    .await?;
                let root_token = stored.get(ROOT_TOKEN_KEY).ok_or_else(|| {
                    Error::NotFound(format!(
                        "{} in {}/{}",
                        ROOT_TOKEN_KEY,
                        names::VAULT_NAMESPACE,
                        names::VAULT_UNSEAL_SECRET
                    ))
                })?;
                ctx.vault
                    .put(secret::VAULT_ROOT_TOKEN, root_token, WriteMode::Overwrite)?;
                tracing::info!("recovered vault root token from the cluster");
                Ok(())
            }
        }
    }

    async fn write_unseal_secret(
        &self,
        ctx: &StepContext<'_>,
        root_token: &str,
        unseal_keys: &[String],
    ) -> Result<()> {
        let manifest = manifests::vault_unseal_secret(root_token, unseal_keys)?;
        ctx.adapters.kubernetes.apply(&manifest).await
    }
}

#[async_trait]
impl Effect for VaultInitialized {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let workload = WorkloadRef::new(
            WorkloadKind::StatefulSet,
            "app.kubernetes.io/name=vault",
            names::VAULT_NAMESPACE,
        );
        let timeout = Duration::from_secs(self.options.timeouts.workload_ready_secs);
        ctx.with_deadline(
            &workload.to_string(),
            timeout,
            ctx.adapters.kubernetes.wait_for_workload_ready(&workload, timeout),
        )
        .await?;

        let target = ForwardTarget::new(
            names::VAULT_NAMESPACE,
            "pod/vault-0",
            self.options.ports.vault,
            VAULT_REMOTE_PORT,
        );
        ctx.with_forward(&target, |url| async move { self.converge(ctx, &url).await })
            .await
    }
}
