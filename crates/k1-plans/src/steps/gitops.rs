use super::kbot::ensure_kbot_keys;
use crate::templates::{self, Tokens};
use crate::{PlanOptions, names};
use async_trait::async_trait;
use k1_config::TemplateSource;
use k1_engine::vault::names as secret;
use k1_engine::{Effect, Error, InstallSession, Result, StepContext};
use std::path::Path;
use std::sync::Arc;

const INITIAL_COMMIT: &str = "initial commit by k1";

/// Placeholder values substituted into both template repositories.
pub fn template_tokens(session: &InstallSession, kbot_public_key: &str) -> Tokens {
    let owner_token = format!("{}_OWNER", session.git_provider.as_str().to_uppercase());
    let domain = session.domain_name.as_str();
    [
        ("CLUSTER_NAME", session.cluster_name.clone()),
        ("CLUSTER_ID", session.cluster_id.clone()),
        ("CLUSTER_TYPE", session.cluster_type.as_str().to_string()),
        ("CLOUD_PROVIDER", session.cloud_provider.as_str().to_string()),
        ("CLOUD_REGION", session.region.clone()),
        ("DOMAIN_NAME", domain.to_string()),
        ("GIT_PROVIDER", session.git_provider.as_str().to_string()),
        ("GIT_OWNER", session.git_owner.clone()),
        (owner_token.as_str(), session.git_owner.clone()),
        ("GITOPS_REPO_URL", names::gitops_repo_url(session)),
        ("METAPHOR_REPO_URL", names::metaphor_repo_url(session)),
        ("ATLANTIS_WEBHOOK_URL", names::atlantis_webhook_url(domain)),
        ("ARGOCD_INGRESS_URL", names::argocd_url(domain)),
        ("VAULT_INGRESS_URL", names::vault_url(domain)),
        ("KBOT_PUBLIC_KEY", kbot_public_key.to_string()),
        ("STATE_STORE_BUCKET", session.state_store_bucket()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Local gitops and metaphor repositories, detokenized and committed,
/// ready to be pushed once terraform has created their remotes.
pub struct GitopsReadyToPush {
    pub options: Arc<PlanOptions>,
}

impl GitopsReadyToPush {
    async fn prepare(
        &self,
        ctx: &StepContext<'_>,
        source: &TemplateSource,
        dir: &Path,
        subtrees: &[String],
        remote_url: &str,
        tokens: &Tokens,
    ) -> Result<()> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .map_err(|e| Error::io(format!("clearing {}", dir.display()), e))?;
        }
        let git = &ctx.adapters.git;
        ctx.cancellable(git.clone_repo(&source.url, &source.branch, dir))
            .await?;
        if !subtrees.is_empty() && templates::promote_subtree(dir, subtrees)?.is_none() {
            tracing::warn!(template = %source.url, "no subtree for this cluster; using the template root");
        }
        let replaced = templates::detokenize_dir(dir, tokens)?;
        git.init_with_remote(dir, names::REMOTE_NAME, remote_url).await?;
        git.commit_all(dir, INITIAL_COMMIT).await?;
        tracing::info!(dir = %dir.display(), files = replaced, "template prepared");
        Ok(())
    }
}

#[async_trait]
impl Effect for GitopsReadyToPush {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let public_key = ensure_kbot_keys(ctx).await?;
        let session = ctx.session()?;
        let tokens = template_tokens(&session, &public_key);

        let subtrees = templates::subtree_candidates(
            session.cloud_provider.as_str(),
            session.git_provider.as_str(),
            session.cluster_type.as_str(),
        );
        self.prepare(
            ctx,
            &self.options.gitops_template,
            &ctx.paths.gitops_dir(),
            &subtrees,
            &names::gitops_repo_url(&session),
            &tokens,
        )
        .await?;
        self.prepare(
            ctx,
            &self.options.metaphor_template,
            &ctx.paths.metaphor_dir(),
            &[],
            &names::metaphor_repo_url(&session),
            &tokens,
        )
        .await
    }
}

/// Push both repositories to the remotes terraform created.
///
/// Guarded: a remote that already has our `HEAD` is left alone, and a
/// remote repository this session does not manage is never pushed to.
pub struct GitopsRepoPushed;

#[async_trait]
impl Effect for GitopsRepoPushed {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let session = ctx.session()?;
        let managed = ctx
            .vault
            .get_string(secret::GIT_MANAGED_REPOS)?
            .unwrap_or_default();
        let repos = [
            (names::GITOPS_REPO, ctx.paths.gitops_dir()),
            (names::METAPHOR_REPO, ctx.paths.metaphor_dir()),
        ];

        for (repo, dir) in repos {
            let url = names::repo_url(session.git_provider, &session.git_owner, repo);
            let is_managed = managed.split(',').any(|m| m == repo);
            if !is_managed {
                let status = ctx
                    .adapters
                    .git_provider
                    .check_repo_exists(&session.git_owner, repo)
                    .await?;
                if status.exists {
                    return Err(Error::conflict_with(
                        format!("repository {} exists but was not created by this install", url),
                        vec![
                            format!("delete {} or choose another git owner", url),
                            "re-run the create command".to_string(),
                        ],
                    ));
                }
            }

            let git = &ctx.adapters.git;
            if git.remote_has_head(&dir, names::REMOTE_NAME).await? {
                tracing::info!(repo = %url, "remote already up to date");
                continue;
            }
            ctx.cancellable(git.push(&dir, names::REMOTE_NAME)).await?;
            tracing::info!(repo = %url, "pushed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k1_engine::fakes::FakeWorld;
    use k1_engine::{ErrorKind, WriteMode};

    fn harness(world: &FakeWorld) -> k1_engine::fakes::ContextHarness {
        let harness = world.context_harness();
        let session =
            InstallSession::new(&harness.params, "abcdefgh12345678".into(), Default::default());
        harness.vault.create_session(&session).unwrap();
        harness
    }

    #[tokio::test]
    async fn test_gitops_subtree_promoted_and_detokenized() {
        let world = FakeWorld::new();
        let harness = harness(&world);
        let ctx = harness.context("gitops-ready-to-push");

        GitopsReadyToPush {
            options: Arc::new(PlanOptions::default()),
        }
        .run(&ctx)
        .await
        .unwrap();

        let gitops = ctx.paths.gitops_dir();
        let cluster = std::fs::read_to_string(gitops.join("cluster.yaml")).unwrap();
        assert_eq!(cluster, "name: kf\ndomain: example.test\nowner: acme\n");
        let registry = std::fs::read_to_string(gitops.join("registry/argocd.yaml")).unwrap();
        assert_eq!(registry, "repoURL: git@github.com:acme/gitops.git\n");
        assert!(!gitops.join("k3d-github").exists());

        let app = std::fs::read_to_string(ctx.paths.metaphor_dir().join("metaphor/app.yaml")).unwrap();
        assert_eq!(app, "host: metaphor.example.test\n");
        assert_eq!(world.journal.calls_matching("git.commit_all").len(), 2);
    }

    #[tokio::test]
    async fn test_push_skips_remote_with_head() {
        let world = FakeWorld::new();
        let harness = harness(&world);
        harness
            .vault
            .put(secret::GIT_MANAGED_REPOS, "gitops,metaphor", WriteMode::Overwrite)
            .unwrap();
        let ctx = harness.context("gitops-repo-pushed");
        world.git.mark_pushed(&ctx.paths.gitops_dir());

        GitopsRepoPushed.run(&ctx).await.unwrap();

        assert_eq!(world.journal.calls_matching("git.push"), vec!["git.push metaphor origin"]);
    }

    #[tokio::test]
    async fn test_unmanaged_remote_is_conflict() {
        let world = FakeWorld::new();
        world.git_provider.add_repo("gitops");
        let harness = harness(&world);
        let ctx = harness.context("gitops-repo-pushed");

        let err = GitopsRepoPushed.run(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("git@github.com:acme/gitops.git"));
        assert!(world.journal.calls_matching("git.push").is_empty());
    }
}
