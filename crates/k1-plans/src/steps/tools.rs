use crate::PlanOptions;
use async_trait::async_trait;
use k1_engine::adapter::ToolSpec;
use k1_engine::{Effect, Result, StepContext};
use std::sync::Arc;

/// kubectl and terraform, pinned, in the workspace's tools directory.
pub struct ToolsDownloaded {
    pub options: Arc<PlanOptions>,
}

impl ToolsDownloaded {
    fn specs(&self) -> [ToolSpec; 2] {
        [
            ToolSpec::new("kubectl", &self.options.tools.kubectl),
            ToolSpec::new("terraform", &self.options.tools.terraform),
        ]
    }
}

#[async_trait]
impl Effect for ToolsDownloaded {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let dest = ctx.paths.tools_dir();
        for spec in self.specs() {
            let path = ctx
                .cancellable(ctx.adapters.tools.ensure(&spec, &dest))
                .await?;
            tracing::info!(tool = %spec.name, version = %spec.version, path = %path.display(), "tool ready");
        }
        Ok(())
    }
}
