use super::remember;
use crate::{PlanOptions, manifests, names};
use async_trait::async_trait;
use k1_engine::adapter::{ForwardTarget, WorkloadKind, WorkloadRef};
use k1_engine::vault::names as secret;
use k1_engine::{Effect, Error, Result, StepContext, WriteMode};
use std::sync::Arc;
use std::time::Duration;

const ARGOCD_NAMESPACE: &str = "argocd";
const INITIAL_ADMIN_SECRET: &str = "argocd-initial-admin-secret";
const SERVER_REMOTE_PORT: u16 = 80;

/// Argo CD from the pinned remote kustomization, then wait for its server.
pub struct ArgoCdInstall {
    pub options: Arc<PlanOptions>,
}

#[async_trait]
impl Effect for ArgoCdInstall {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let source = names::argocd_manifests(ctx.params.cloud_provider);
        let kubernetes = &ctx.adapters.kubernetes;
        ctx.cancellable(kubernetes.apply_kustomization(&source)).await?;

        let server = WorkloadRef::new(
            WorkloadKind::Deployment,
            "app.kubernetes.io/name=argocd-server",
            ARGOCD_NAMESPACE,
        );
        let timeout = Duration::from_secs(self.options.timeouts.workload_ready_secs);
        ctx.with_deadline(
            &server.to_string(),
            timeout,
            kubernetes.wait_for_workload_ready(&server, timeout),
        )
        .await?;
        tracing::info!(source = %source, "argocd is ready");
        Ok(())
    }
}

/// Capture the admin password and a fresh API session token.
pub struct ArgoCdCredentials {
    pub options: Arc<PlanOptions>,
}

#[async_trait]
impl Effect for ArgoCdCredentials {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let initial = ctx
            .adapters
            .kubernetes
            .read_secret(ARGOCD_NAMESPACE, INITIAL_ADMIN_SECRET)
            .await?;
        let from_cluster = initial.get("password").cloned().ok_or_else(|| {
            Error::NotFound(format!(
                "password in {}/{}",
                ARGOCD_NAMESPACE, INITIAL_ADMIN_SECRET
            ))
        })?;
        let password = remember(ctx.vault, secret::ARGOCD_PASSWORD, || from_cluster)?;

        let target = ForwardTarget::new(
            ARGOCD_NAMESPACE,
            "svc/argocd-server",
            self.options.ports.argocd,
            SERVER_REMOTE_PORT,
        );
        let token = ctx
            .with_forward(&target, |url| {
                let password = password.clone();
                async move {
                    ctx.adapters
                        .argocd
                        .session_token(&url, names::ARGOCD_ADMIN, &password)
                        .await
                }
            })
            .await?;
        // Session tokens expire; every run refreshes it.
        ctx.vault
            .put(secret::ARGOCD_AUTH_TOKEN, token, WriteMode::Overwrite)?;
        tracing::info!("argocd credentials captured");
        Ok(())
    }
}

/// The `registry` application that hands the cluster over to the gitops repo.
pub struct ArgoCdRegistry;

#[async_trait]
impl Effect for ArgoCdRegistry {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let session = ctx.session()?;
        let manifest =
            manifests::registry_application(&names::gitops_repo_url(&session), &session.cluster_name)?;
        ctx.cancellable(ctx.adapters.kubernetes.apply(&manifest))
            .await?;
        tracing::info!(cluster = %session.cluster_name, "argocd registry application created");
        Ok(())
    }
}
