//! Local git plumbing through the `git` CLI

use crate::error::AdapterError;
use crate::process::Cmd;
use async_trait::async_trait;
use k1_engine::adapter::GitClient;
use k1_engine::{Error, Result};
use std::path::Path;

const DEFAULT_BRANCH: &str = "main";
const BOT_NAME: &str = "kbot";
const BOT_EMAIL: &str = "kbot@k1.dev";

/// Pushes authenticate with the provider token over HTTPS: ssh remotes
/// are rewritten through `url.<base>.insteadOf` passed in the environment,
/// so the token never shows up in a process listing.
pub struct GitCli {
    rewrite: Option<(String, String)>,
}

impl GitCli {
    pub fn new() -> Self {
        Self { rewrite: None }
    }

    /// Authenticate pushes to `host` with `token`.
    pub fn with_token(host: &str, token: &str) -> Self {
        Self {
            rewrite: Some((
                format!("https://oauth2:{}@{}/", token, host),
                format!("git@{}:", host),
            )),
        }
    }

    fn cmd(&self, dir: &Path) -> Cmd {
        let cmd = Cmd::new("git")
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0");
        match &self.rewrite {
            Some((base, ssh_prefix)) => cmd
                .env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", format!("url.{}.insteadOf", base))
                .env("GIT_CONFIG_VALUE_0", ssh_prefix.clone()),
            None => cmd,
        }
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitClient for GitCli {
    async fn clone_repo(&self, url: &str, branch: &str, dir: &Path) -> Result<()> {
        let parent = dir
            .parent()
            .ok_or_else(|| Error::internal(format!("{} has no parent", dir.display())))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
        self.cmd(parent)
            .args(["clone", "--depth", "1", "--branch", branch, url])
            .arg(dir.to_string_lossy())
            .run()
            .await?;
        Ok(())
    }

    async fn init_with_remote(&self, dir: &Path, remote_name: &str, url: &str) -> Result<()> {
        let git_dir = dir.join(".git");
        if git_dir.exists() {
            tokio::fs::remove_dir_all(&git_dir)
                .await
                .map_err(|e| Error::io(format!("removing {}", git_dir.display()), e))?;
        }
        self.cmd(dir)
            .args(["init", "--initial-branch", DEFAULT_BRANCH])
            .run()
            .await?;
        self.cmd(dir).args(["remote", "add", remote_name, url]).run().await?;
        Ok(())
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> Result<()> {
        self.cmd(dir).args(["add", "--all"]).run().await?;
        self.cmd(dir)
            .arg("-c")
            .arg(format!("user.name={}", BOT_NAME))
            .arg("-c")
            .arg(format!("user.email={}", BOT_EMAIL))
            .args(["commit", "--allow-empty", "-m", message])
            .run()
            .await?;
        Ok(())
    }

    async fn push(&self, dir: &Path, remote_name: &str) -> Result<()> {
        self.cmd(dir)
            .args(["push", "--set-upstream", remote_name, DEFAULT_BRANCH])
            .run()
            .await?;
        Ok(())
    }

    async fn remote_has_head(&self, dir: &Path, remote_name: &str) -> Result<bool> {
        let head = self.cmd(dir).args(["rev-parse", "HEAD"]).run().await?;
        let remote = match self
            .cmd(dir)
            .args(["ls-remote", "--heads", remote_name, DEFAULT_BRANCH])
            .run()
            .await
        {
            Ok(out) => out,
            // An empty repository still answers; anything reporting it missing means no head.
            Err(AdapterError::CommandFailed { stderr, .. })
                if stderr.to_lowercase().contains("not found") =>
            {
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(remote_matches(&remote, head.trim()))
    }
}

/// Whether `ls-remote` output lists `head` as the commit of some ref.
fn remote_matches(ls_remote: &str, head: &str) -> bool {
    !head.is_empty()
        && ls_remote
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|sha| sha == head)
}
