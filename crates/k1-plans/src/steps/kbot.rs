use super::remember;
use crate::{PlanOptions, names};
use async_trait::async_trait;
use k1_engine::vault::names as secret;
use k1_engine::{Effect, ErrorKind, GitProvider, Result, StepContext, WriteMode};
use std::sync::Arc;

const BOT_PASSWORD_LEN: usize = 20;
const WEBHOOK_SECRET_LEN: usize = 20;

/// The bot's SSH key pair, generated at most once per session.
///
/// Returns the public key.
pub async fn ensure_kbot_keys(ctx: &StepContext<'_>) -> Result<String> {
    let private = ctx.vault.get_string(secret::SSH_PRIVATE_KEY)?;
    let public = ctx.vault.get_string(secret::SSH_PUBLIC_KEY)?;
    if let (Some(_), Some(public)) = (private, public) {
        return Ok(public);
    }

    let pair = ctx.adapters.keygen.generate_ssh_keypair().await?;
    ctx.vault
        .put(secret::SSH_PRIVATE_KEY, &pair.private_key, WriteMode::Overwrite)?;
    ctx.vault
        .put(secret::SSH_PUBLIC_KEY, &pair.public_key, WriteMode::Overwrite)?;
    tracing::info!("generated kbot ssh key pair");
    Ok(pair.public_key)
}

/// Bot identity: SSH keys, password and the Atlantis webhook secret.
pub struct KbotSetup {
    pub options: Arc<PlanOptions>,
}

#[async_trait]
impl Effect for KbotSetup {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let public_key = ensure_kbot_keys(ctx).await?;

        let requested = self.options.kbot_password.clone();
        let password = remember(ctx.vault, secret::BOT_PASSWORD, || {
            requested
                .clone()
                .unwrap_or_else(|| ctx.adapters.random.string(BOT_PASSWORD_LEN))
        })?;
        if requested.is_some_and(|r| r != password) {
            tracing::warn!("keeping the bot password of the existing session; --kbot-password ignored");
        }

        remember(ctx.vault, secret::WEBHOOK_ATLANTIS, || {
            ctx.adapters.random.string(WEBHOOK_SECRET_LEN)
        })?;

        if ctx.params.git_provider == GitProvider::Gitlab {
            let session = ctx.session()?;
            let key_name = names::kbot_ssh_key_name(&session);
            match ctx
                .adapters
                .git_provider
                .create_ssh_key(&key_name, &public_key)
                .await
            {
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    tracing::debug!(key = %key_name, "kbot ssh key already uploaded");
                }
                other => other?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k1_engine::fakes::{ContextHarness, FakeWorld, sample_params};
    use k1_engine::InstallSession;

    #[tokio::test]
    async fn test_keys_generated_once() {
        let world = FakeWorld::new();
        let harness = world.context_harness();
        let ctx = harness.context("kbot-setup");

        let first = ensure_kbot_keys(&ctx).await.unwrap();
        let second = ensure_kbot_keys(&ctx).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(world.journal.calls_matching("keygen.").len(), 1);
    }

    #[tokio::test]
    async fn test_password_override_and_webhook() {
        let world = FakeWorld::new();
        let harness = world.context_harness();
        let ctx = harness.context("kbot-setup");
        let step = KbotSetup {
            options: Arc::new(PlanOptions {
                kbot_password: Some("hunter2-but-longer".into()),
                ..PlanOptions::default()
            }),
        };

        step.run(&ctx).await.unwrap();
        step.run(&ctx).await.unwrap();

        assert_eq!(
            harness.vault.get_string(secret::BOT_PASSWORD).unwrap().as_deref(),
            Some("hunter2-but-longer")
        );
        let webhook = harness.vault.require_string(secret::WEBHOOK_ATLANTIS).unwrap();
        assert_eq!(webhook.len(), WEBHOOK_SECRET_LEN);
        assert_eq!(world.random.calls(), 1);
    }

    #[tokio::test]
    async fn test_gitlab_uploads_key() {
        let world = FakeWorld::new();
        let mut params = sample_params();
        params.git_provider = GitProvider::Gitlab;
        let harness = ContextHarness::new(world.adapters(), params.clone());
        let session = InstallSession::new(&params, "abcdefgh12345678".into(), Default::default());
        harness.vault.create_session(&session).unwrap();
        let ctx = harness.context("kbot-setup");

        KbotSetup {
            options: Arc::new(PlanOptions::default()),
        }
        .run(&ctx)
        .await
        .unwrap();

        let keys = world.git_provider.ssh_keys.lock().unwrap().clone();
        assert!(keys["kbot-kf"].starts_with("ssh-ed25519"));
    }
}
