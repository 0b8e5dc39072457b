use super::tolerate_missing;
use crate::PlanOptions;
use async_trait::async_trait;
use k1_engine::adapter::ClusterSpec;
use k1_engine::{Effect, Result, StepContext};
use std::sync::Arc;

/// The local k3d cluster. Its kubeconfig lands in the workspace.
pub struct CreateLocalCluster {
    pub options: Arc<PlanOptions>,
}

#[async_trait]
impl Effect for CreateLocalCluster {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let session = ctx.session()?;
        let spec = ClusterSpec {
            name: session.cluster_name.clone(),
            region: session.region.clone(),
            node_count: self.options.node_count,
            node_type: self.options.node_type.clone(),
            kubeconfig_path: ctx.paths.kubeconfig(),
        };
        ctx.cancellable(ctx.adapters.cloud.create_kubernetes_cluster(&spec))
            .await?;
        tracing::info!(cluster = %spec.name, kubeconfig = %spec.kubeconfig_path.display(), "cluster is up");
        Ok(())
    }
}

pub struct DeleteLocalCluster;

#[async_trait]
impl Effect for DeleteLocalCluster {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let session = ctx.session()?;
        tolerate_missing(
            ctx.adapters
                .cloud
                .delete_kubernetes_cluster(&session.cluster_name)
                .await,
            &session.cluster_name,
        )
    }
}
