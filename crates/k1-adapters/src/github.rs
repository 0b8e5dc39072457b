//! GitHub through `gh api`

use crate::process::Cmd;
use async_trait::async_trait;
use k1_engine::adapter::{EnvSource, GitProviderApi, GitUser, RepoStatus};
use k1_engine::{Error, ErrorKind, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

const TOKEN_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct SshKey {
    id: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct Hook {
    id: u64,
    #[serde(default)]
    config: HookConfig,
}

#[derive(Debug, Default, Deserialize)]
struct HookConfig {
    #[serde(default)]
    url: Option<String>,
}

pub struct GhCli {
    env: Arc<dyn EnvSource>,
}

impl GhCli {
    pub fn new(env: Arc<dyn EnvSource>) -> Self {
        Self { env }
    }

    fn cmd(&self, token: Option<&str>) -> Result<Cmd> {
        let token = match token {
            Some(token) => token.to_string(),
            None => self
                .env
                .var(TOKEN_VAR)
                .ok_or_else(|| Error::precondition(format!("{} is not set", TOKEN_VAR)))?,
        };
        Ok(Cmd::new("gh").env("GH_TOKEN", token).arg("api"))
    }

    /// The key travels as a JSON body on stdin, out of the logged command line.
    fn ssh_key_request(&self, name: &str, public_key: &str) -> Result<Cmd> {
        let body = serde_json::json!({ "title": name, "key": public_key });
        Ok(self
            .cmd(None)?
            .args(["-X", "POST", "user/keys", "--input", "-"])
            .stdin(body.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let out = self.cmd(None)?.arg(path).run().await?;
        Ok(serde_json::from_str(&out).map_err(crate::error::AdapterError::from)?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.cmd(None)?.args(["-X", "DELETE", path]).run().await?;
        Ok(())
    }
}

fn find_hook(hooks: &[Hook], url: &str) -> Option<u64> {
    hooks
        .iter()
        .find(|h| h.config.url.as_deref() == Some(url))
        .map(|h| h.id)
}

#[async_trait]
impl GitProviderApi for GhCli {
    async fn user_info(&self, token: &str) -> Result<GitUser> {
        let out = self.cmd(Some(token))?.arg("user").run().await?;
        let user: User = serde_json::from_str(&out).map_err(crate::error::AdapterError::from)?;
        Ok(GitUser { login: user.login })
    }

    async fn check_repo_exists(&self, owner: &str, name: &str) -> Result<RepoStatus> {
        let result = self
            .cmd(None)?
            .arg(format!("repos/{}/{}", owner, name))
            .run()
            .await
            .map_err(Error::from);
        match result {
            Ok(_) => Ok(RepoStatus {
                exists: true,
                forbidden: false,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(RepoStatus::default()),
            Err(e) if e.kind() == ErrorKind::Auth => Ok(RepoStatus {
                exists: false,
                forbidden: true,
            }),
            Err(e) => Err(e),
        }
    }

    async fn check_team_exists(&self, owner: &str, team: &str) -> Result<bool> {
        let result = self
            .cmd(None)?
            .arg(format!("orgs/{}/teams/{}", owner, team))
            .run()
            .await
            .map_err(Error::from);
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<()> {
        self.ssh_key_request(name, public_key)?.run().await?;
        Ok(())
    }

    async fn delete_ssh_key(&self, name: &str) -> Result<()> {
        let keys: Vec<SshKey> = self.get("user/keys").await?;
        let key = keys
            .iter()
            .find(|k| k.title == name)
            .ok_or_else(|| Error::NotFound(format!("ssh key {}", name)))?;
        self.delete(&format!("user/keys/{}", key.id)).await
    }

    async fn delete_webhook(&self, owner: &str, repo: &str, url: &str) -> Result<()> {
        let hooks: Vec<Hook> = self.get(&format!("repos/{}/{}/hooks", owner, repo)).await?;
        let id = find_hook(&hooks, url)
            .ok_or_else(|| Error::NotFound(format!("webhook {} on {}/{}", url, owner, repo)))?;
        self.delete(&format!("repos/{}/{}/hooks/{}", owner, repo, id))
            .await
    }

    async fn create_deploy_token(
        &self,
        _owner: &str,
        _repo: &str,
        _scopes: &[&str],
    ) -> Result<String> {
        Err(crate::error::AdapterError::Unsupported(
            "github has no deploy tokens; use the kbot ssh key".into(),
        )
        .into())
    }
}
