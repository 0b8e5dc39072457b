use crate::names;
use async_trait::async_trait;
use k1_engine::vault::names as secret;
use k1_engine::{
    CLUSTER_ID_LEN, Effect, Error, InstallSession, Result, StepContext, WriteMode,
};

fn read_token(ctx: &StepContext<'_>, var: &str, what: &str) -> Result<String> {
    ctx.adapters.env.var(var).ok_or_else(|| {
        Error::precondition(format!(
            "{} is not set; export your {} API token and run the command again",
            var, what
        ))
    })
}

/// Capture the cloud token and create the install session.
///
/// The session, and with it the cluster id, is created on the first run
/// only; resumes read it back.
pub struct CloudCredentials;

#[async_trait]
impl Effect for CloudCredentials {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let cloud = ctx.params.cloud_provider;
        if let Some(var) = cloud.token_env_var() {
            let token = read_token(ctx, var, cloud.as_str())?;
            ctx.vault.put(
                &secret::provider_token(cloud.as_str()),
                token,
                WriteMode::Overwrite,
            )?;
        }

        if let Some(session) = ctx.vault.session() {
            tracing::debug!(cluster_id = %session.cluster_id, "reusing install session");
            return Ok(());
        }

        let cluster_id = ctx.adapters.random.string(CLUSTER_ID_LEN);
        let session = InstallSession::new(ctx.params, cluster_id, ctx.adapters.clock.now());
        ctx.vault.create_session(&session)?;
        tracing::info!(cluster_id = %session.cluster_id, cluster = %session.cluster_name, "created install session");
        Ok(())
    }
}

/// Capture the git token, resolve the bot user and refuse to continue when
/// the owner already has repositories or teams this install would create.
pub struct GitCredentials;

#[async_trait]
impl Effect for GitCredentials {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let git = ctx.params.git_provider;
        let owner = &ctx.params.git_owner;
        let token = read_token(ctx, git.token_env_var(), git.as_str())?;

        let user = ctx.adapters.git_provider.user_info(&token).await?;
        ctx.vault.put(secret::GIT_TOKEN, &token, WriteMode::Overwrite)?;
        ctx.vault.put(secret::GIT_USER, &user.login, WriteMode::Overwrite)?;
        tracing::info!(user = %user.login, provider = %git, "git credentials verified");

        let managed = ctx
            .vault
            .get_string(secret::GIT_MANAGED_REPOS)?
            .unwrap_or_default();
        let managed: Vec<&str> = managed.split(',').filter(|s| !s.is_empty()).collect();

        let mut blocking = Vec::new();
        for repo in names::MANAGED_REPOS {
            if managed.contains(repo) {
                continue;
            }
            let url = names::repo_url(git, owner, repo);
            let status = ctx.adapters.git_provider.check_repo_exists(owner, repo).await?;
            if status.forbidden {
                return Err(Error::Auth(format!(
                    "the {} token cannot access repository {}",
                    git, url
                )));
            }
            if status.exists {
                blocking.push(format!("delete or rename the repository {}", url));
            }
        }

        if managed.is_empty() {
            for team in names::MANAGED_TEAMS {
                if ctx.adapters.git_provider.check_team_exists(owner, team).await? {
                    blocking.push(format!("delete the team `{}` of `{}`", team, owner));
                }
            }
        }

        if !blocking.is_empty() {
            return Err(Error::conflict_with(
                format!("{} owner `{}` already has resources k1 creates", git, owner),
                blocking,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k1_engine::ErrorKind;
    use k1_engine::fakes::FakeWorld;

    #[tokio::test]
    async fn test_missing_cloud_token_names_variable() {
        let world = FakeWorld::new();
        let harness = world.context_harness();
        let ctx = harness.context("cloud-credentials");

        let err = CloudCredentials.run(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.to_string().contains("CIVO_TOKEN"));
        assert!(harness.vault.session().is_none());
    }

    #[tokio::test]
    async fn test_session_created_once() {
        let world = FakeWorld::new();
        world.env.set("CIVO_TOKEN", "tok-1");
        let harness = world.context_harness();
        let ctx = harness.context("cloud-credentials");

        CloudCredentials.run(&ctx).await.unwrap();
        let first = harness.vault.require_session().unwrap();
        CloudCredentials.run(&ctx).await.unwrap();

        assert_eq!(harness.vault.require_session().unwrap(), first);
        assert_eq!(first.cluster_id.len(), CLUSTER_ID_LEN);
        assert_eq!(world.random.calls(), 1);
        assert_eq!(harness.vault.get_string("token.civo").unwrap().as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_existing_repos_and_teams_conflict() {
        let world = FakeWorld::new();
        world.env.set("GITHUB_TOKEN", "ghp-1");
        world.git_provider.add_repo("metaphor");
        world.git_provider.add_team("admins");
        let harness = world.context_harness();
        let ctx = harness.context("git-credentials");

        let err = GitCredentials.run(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let message = err.to_string();
        assert!(message.contains("git@github.com:acme/metaphor.git"));
        assert!(message.contains("`admins`"));
        assert!(!message.contains("acme/gitops.git"));
    }

    #[tokio::test]
    async fn test_repos_managed_by_session_do_not_conflict() {
        let world = FakeWorld::new();
        world.env.set("GITHUB_TOKEN", "ghp-1");
        world.git_provider.add_repo("gitops");
        world.git_provider.add_repo("metaphor");
        world.git_provider.add_team("admins");
        let harness = world.context_harness();
        harness
            .vault
            .put(secret::GIT_MANAGED_REPOS, "gitops,metaphor", WriteMode::Overwrite)
            .unwrap();
        let ctx = harness.context("git-credentials");

        GitCredentials.run(&ctx).await.unwrap();
        assert_eq!(
            harness.vault.get_string(secret::GIT_USER).unwrap().as_deref(),
            Some("kbot-acme")
        );
    }

    #[tokio::test]
    async fn test_forbidden_repo_is_auth() {
        let world = FakeWorld::new();
        world.env.set("GITHUB_TOKEN", "ghp-1");
        world
            .git_provider
            .forbidden_repos
            .lock()
            .unwrap()
            .insert("gitops".into());
        let harness = world.context_harness();
        let ctx = harness.context("git-credentials");

        let err = GitCredentials.run(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }
}
