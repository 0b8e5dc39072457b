use crate::manifests::{self, BootstrapInputs};
use crate::names;
use async_trait::async_trait;
use k1_engine::vault::names as secret;
use k1_engine::{Effect, ErrorKind, Result, StepContext};

fn inputs(ctx: &StepContext<'_>) -> Result<BootstrapInputs> {
    let session = ctx.session()?;
    let vault = ctx.vault;

    let state_store = match (
        vault.get_string(secret::STATE_STORE_ACCESS_KEY)?,
        vault.get_string(secret::STATE_STORE_SECRET_KEY)?,
    ) {
        (Some(access), Some(secret_key)) => Some((access, secret_key)),
        _ => None,
    };
    let cloud_token = match session.cloud_provider.token_env_var() {
        Some(_) => {
            let cloud = session.cloud_provider.as_str();
            Some((
                format!("{}-token", cloud),
                vault.require_string(&secret::provider_token(cloud))?,
            ))
        }
        None => None,
    };

    Ok(BootstrapInputs {
        cluster_id: session.cluster_id.clone(),
        git_provider: session.git_provider,
        git_owner: session.git_owner.clone(),
        git_user: vault.require_string(secret::GIT_USER)?,
        git_token: vault.require_string(secret::GIT_TOKEN)?,
        gitops_repo_url: names::gitops_repo_url(&session),
        ssh_private_key: vault.require_string(secret::SSH_PRIVATE_KEY)?,
        ssh_public_key: vault.require_string(secret::SSH_PUBLIC_KEY)?,
        webhook_secret: vault.require_string(secret::WEBHOOK_ATLANTIS)?,
        webhook_url: names::atlantis_webhook_url(&session.domain_name),
        state_store,
        cloud_token,
    })
}

/// Namespaces and secrets the platform needs before Argo CD takes over.
///
/// Guarded by the `k1/k1-bootstrap` marker secret, which is written last.
pub struct BootstrapSecrets;

#[async_trait]
impl Effect for BootstrapSecrets {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let kubernetes = &ctx.adapters.kubernetes;
        match kubernetes
            .read_secret(names::BOOTSTRAP_NAMESPACE, names::BOOTSTRAP_SECRET)
            .await
        {
            Ok(_) => {
                tracing::info!("bootstrap secrets already present");
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let manifest = manifests::bootstrap_secrets(&inputs(ctx)?)?;
        ctx.cancellable(kubernetes.apply(&manifest)).await?;
        tracing::info!("bootstrap secrets created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k1_engine::fakes::FakeWorld;
    use k1_engine::{InstallSession, WriteMode};

    #[tokio::test]
    async fn test_applied_once_then_skipped() {
        let world = FakeWorld::new();
        let harness = world.context_harness();
        let session =
            InstallSession::new(&harness.params, "abcdefgh12345678".into(), Default::default());
        harness.vault.create_session(&session).unwrap();
        for (name, value) in [
            (secret::GIT_USER, "kbot-acme"),
            (secret::GIT_TOKEN, "ghp-secret"),
            (secret::SSH_PRIVATE_KEY, "private"),
            (secret::SSH_PUBLIC_KEY, "ssh-ed25519 AAAA kbot"),
            (secret::WEBHOOK_ATLANTIS, "hook"),
            ("token.civo", "civo-secret"),
        ] {
            harness.vault.put(name, value, WriteMode::Overwrite).unwrap();
        }
        let ctx = harness.context("k8s-secrets-created");

        BootstrapSecrets.run(&ctx).await.unwrap();
        BootstrapSecrets.run(&ctx).await.unwrap();

        assert_eq!(world.journal.calls_matching("kubernetes.apply").len(), 1);
        let marker = world.kubernetes.secret("k1", "k1-bootstrap").unwrap();
        assert_eq!(marker["cluster-id"], "abcdefgh12345678");
        let dns = world.kubernetes.secret("external-dns", "cloud-creds").unwrap();
        assert_eq!(dns["civo-token"], "civo-secret");
    }

    #[tokio::test]
    async fn test_unreachable_cluster_propagates() {
        let world = FakeWorld::new();
        world.journal.once(
            "kubernetes.read_secret",
            k1_engine::fakes::Behavior::Fail(ErrorKind::Io, "connection refused".into()),
        );
        let harness = world.context_harness();
        let ctx = harness.context("k8s-secrets-created");

        let err = BootstrapSecrets.run(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(world.journal.calls_matching("kubernetes.apply").is_empty());
    }
}
