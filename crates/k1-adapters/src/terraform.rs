//! `terraform` CLI runner

use crate::process::{Cmd, resolve_tool};
use async_trait::async_trait;
use k1_engine::Result;
use k1_engine::adapter::{EnvMap, TerraformRunner};
use std::path::{Path, PathBuf};

pub struct TerraformCli {
    tools_dir: PathBuf,
}

impl TerraformCli {
    pub fn new(tools_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: tools_dir.into(),
        }
    }

    fn cmd(&self, dir: &Path, env: &EnvMap) -> Cmd {
        Cmd::new(resolve_tool(&self.tools_dir, "terraform"))
            .current_dir(dir)
            .envs(env)
            .env("TF_IN_AUTOMATION", "1")
    }

    async fn init(&self, dir: &Path, env: &EnvMap) -> Result<()> {
        self.cmd(dir, env)
            .args(["init", "-input=false", "-no-color"])
            .run()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TerraformRunner for TerraformCli {
    async fn init_apply(&self, dir: &Path, env: &EnvMap) -> Result<()> {
        tracing::info!(dir = %dir.display(), "terraform apply");
        self.init(dir, env).await?;
        self.cmd(dir, env)
            .args(["apply", "-auto-approve", "-input=false", "-no-color"])
            .run()
            .await?;
        Ok(())
    }

    async fn init_destroy(&self, dir: &Path, env: &EnvMap) -> Result<()> {
        tracing::info!(dir = %dir.display(), "terraform destroy");
        self.init(dir, env).await?;
        self.cmd(dir, env)
            .args(["destroy", "-auto-approve", "-input=false", "-no-color"])
            .run()
            .await?;
        Ok(())
    }
}
