//! GitLab REST API client

use crate::error::AdapterError;
use crate::http::{self, encode_path};
use async_trait::async_trait;
use k1_engine::adapter::{EnvSource, GitProviderApi, GitUser, RepoStatus};
use k1_engine::{Error, ErrorKind, Result};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

const GITLAB_API_BASE: &str = "https://gitlab.com/api/v4";
const TOKEN_VAR: &str = "GITLAB_TOKEN";
const DEPLOY_TOKEN_NAME: &str = "k1";

#[derive(Debug, Deserialize)]
struct User {
    username: String,
}

#[derive(Debug, Deserialize)]
struct SshKey {
    id: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct Hook {
    id: u64,
    url: String,
}

#[derive(Debug, Deserialize)]
struct DeployToken {
    token: String,
}

pub struct GitlabApi {
    client: reqwest::Client,
    env: Arc<dyn EnvSource>,
}

impl GitlabApi {
    pub fn new(env: Arc<dyn EnvSource>) -> Self {
        Self {
            client: http::client(),
            env,
        }
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> Result<RequestBuilder> {
        let token = match token {
            Some(token) => token.to_string(),
            None => self
                .env
                .var(TOKEN_VAR)
                .ok_or_else(|| Error::precondition(format!("{} is not set", TOKEN_VAR)))?,
        };
        Ok(self
            .client
            .request(method, format!("{}{}", GITLAB_API_BASE, path))
            .header("PRIVATE-TOKEN", token))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = http::send(&self.client, request).await?;
        Ok(response.json().await.map_err(AdapterError::from)?)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let request = self.request(Method::GET, path, None)?;
        match http::send(&self.client, request).await.map_err(Error::from) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl GitProviderApi for GitlabApi {
    async fn user_info(&self, token: &str) -> Result<GitUser> {
        let user: User = self
            .json(self.request(Method::GET, "/user", Some(token))?)
            .await?;
        Ok(GitUser {
            login: user.username,
        })
    }

    async fn check_repo_exists(&self, owner: &str, name: &str) -> Result<RepoStatus> {
        let path = format!("/projects/{}", encode_path(&format!("{}/{}", owner, name)));
        match self.exists(&path).await {
            Ok(exists) => Ok(RepoStatus {
                exists,
                forbidden: false,
            }),
            Err(e) if e.kind() == ErrorKind::Auth => Ok(RepoStatus {
                exists: false,
                forbidden: true,
            }),
            Err(e) => Err(e),
        }
    }

    async fn check_team_exists(&self, owner: &str, team: &str) -> Result<bool> {
        self.exists(&format!("/groups/{}", encode_path(&format!("{}/{}", owner, team))))
            .await
    }

    async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<()> {
        let request = self
            .request(Method::POST, "/user/keys", None)?
            .json(&json!({ "title": name, "key": public_key }));
        let _: Value = self.json(request).await?;
        Ok(())
    }

    async fn delete_ssh_key(&self, name: &str) -> Result<()> {
        let keys: Vec<SshKey> = self.json(self.request(Method::GET, "/user/keys", None)?).await?;
        let key = keys
            .iter()
            .find(|k| k.title == name)
            .ok_or_else(|| Error::NotFound(format!("ssh key {}", name)))?;
        let request = self.request(Method::DELETE, &format!("/user/keys/{}", key.id), None)?;
        http::send(&self.client, request).await?;
        Ok(())
    }

    async fn delete_webhook(&self, owner: &str, repo: &str, url: &str) -> Result<()> {
        let project = encode_path(&format!("{}/{}", owner, repo));
        let hooks: Vec<Hook> = self
            .json(self.request(Method::GET, &format!("/projects/{}/hooks", project), None)?)
            .await?;
        let hook = hooks
            .iter()
            .find(|h| h.url == url)
            .ok_or_else(|| Error::NotFound(format!("webhook {} on {}/{}", url, owner, repo)))?;
        let request = self.request(
            Method::DELETE,
            &format!("/projects/{}/hooks/{}", project, hook.id),
            None,
        )?;
        http::send(&self.client, request).await?;
        Ok(())
    }

    async fn create_deploy_token(&self, owner: &str, repo: &str, scopes: &[&str]) -> Result<String> {
        let project = encode_path(&format!("{}/{}", owner, repo));
        let request = self
            .request(Method::POST, &format!("/projects/{}/deploy_tokens", project), None)?
            .json(&json!({ "name": DEPLOY_TOKEN_NAME, "scopes": scopes }));
        let token: DeployToken = self.json(request).await?;
        Ok(token.token)
    }
}
