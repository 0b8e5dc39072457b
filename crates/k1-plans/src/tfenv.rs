//! Terraform environments
//!
//! Each subsystem's terraform run gets a flat env built from the vault and
//! the session. Values are secret; never log an [`EnvMap`].

use crate::names;
use k1_engine::adapter::EnvMap;
use k1_engine::vault::names as secret;
use k1_engine::{InstallSession, Result, StepContext};

/// Terraform subsystems living under `<gitops>/terraform/<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Git,
    Cloud,
    Vault,
    Users,
}

impl Subsystem {
    /// Directory name of the subsystem for this session.
    pub fn dir_name(&self, session: &InstallSession) -> String {
        match self {
            Subsystem::Git => session.git_provider.as_str().to_string(),
            Subsystem::Cloud => session.cloud_provider.as_str().to_string(),
            Subsystem::Vault => "vault".to_string(),
            Subsystem::Users => "users".to_string(),
        }
    }

    /// Vault and users talk to the in-cluster vault through a port-forward.
    pub fn needs_vault_forward(&self) -> bool {
        matches!(self, Subsystem::Vault | Subsystem::Users)
    }
}

/// Env for `subsystem`. `vault_addr` is the forwarded vault URL when the
/// subsystem needs one.
pub fn build(ctx: &StepContext<'_>, subsystem: Subsystem, vault_addr: Option<&str>) -> Result<EnvMap> {
    let session = ctx.session()?;
    let mut env = EnvMap::new();
    env.insert(
        "TF_DATA_DIR".into(),
        ctx.paths
            .terraform_dir(&subsystem.dir_name(&session))
            .display()
            .to_string(),
    );

    match subsystem {
        Subsystem::Git => git_env(ctx, &session, &mut env)?,
        Subsystem::Cloud => cloud_env(ctx, &session, &mut env)?,
        Subsystem::Vault => vault_env(ctx, &session, vault_addr, &mut env)?,
        Subsystem::Users => users_env(ctx, &session, vault_addr, &mut env)?,
    }
    Ok(env)
}

fn git_prefix(session: &InstallSession) -> String {
    session.git_provider.as_str().to_uppercase()
}

/// Object store credentials for the terraform S3 backend, when the session
/// has a state store.
fn state_store_env(ctx: &StepContext<'_>, env: &mut EnvMap) -> Result<()> {
    let access = ctx.vault.get_string(secret::STATE_STORE_ACCESS_KEY)?;
    let secret_key = ctx.vault.get_string(secret::STATE_STORE_SECRET_KEY)?;
    if let (Some(access), Some(secret_key)) = (access, secret_key) {
        env.insert("AWS_ACCESS_KEY_ID".into(), access.clone());
        env.insert("AWS_SECRET_ACCESS_KEY".into(), secret_key.clone());
        env.insert("TF_VAR_aws_access_key_id".into(), access);
        env.insert("TF_VAR_aws_secret_access_key".into(), secret_key);
    }
    Ok(())
}

fn git_credentials_env(ctx: &StepContext<'_>, session: &InstallSession, env: &mut EnvMap) -> Result<()> {
    let prefix = git_prefix(session);
    env.insert(
        format!("{}_TOKEN", prefix),
        ctx.vault.require_string(secret::GIT_TOKEN)?,
    );
    env.insert(format!("{}_OWNER", prefix), session.git_owner.clone());
    Ok(())
}

fn git_env(ctx: &StepContext<'_>, session: &InstallSession, env: &mut EnvMap) -> Result<()> {
    git_credentials_env(ctx, session, env)?;
    env.insert(
        "TF_VAR_atlantis_repo_webhook_secret".into(),
        ctx.vault.require_string(secret::WEBHOOK_ATLANTIS)?,
    );
    env.insert(
        "TF_VAR_atlantis_repo_webhook_url".into(),
        names::atlantis_webhook_url(&session.domain_name),
    );
    env.insert(
        "TF_VAR_kbot_ssh_public_key".into(),
        ctx.vault.require_string(secret::SSH_PUBLIC_KEY)?,
    );
    state_store_env(ctx, env)
}

fn cloud_env(ctx: &StepContext<'_>, session: &InstallSession, env: &mut EnvMap) -> Result<()> {
    if let Some(var) = session.cloud_provider.token_env_var() {
        let token = ctx
            .vault
            .require_string(&secret::provider_token(session.cloud_provider.as_str()))?;
        env.insert(var.to_string(), token.clone());
        env.insert(
            format!("TF_VAR_{}", var.to_lowercase()),
            token,
        );
    }
    env.insert("TF_VAR_cluster_name".into(), session.cluster_name.clone());
    env.insert("TF_VAR_region".into(), session.region.clone());
    env.insert(
        "TF_VAR_kubeconfig_path".into(),
        ctx.paths.kubeconfig().display().to_string(),
    );
    state_store_env(ctx, env)
}

fn vault_common_env(
    ctx: &StepContext<'_>,
    session: &InstallSession,
    vault_addr: Option<&str>,
    env: &mut EnvMap,
) -> Result<()> {
    let addr = vault_addr.unwrap_or("http://localhost:8200").to_string();
    let token = ctx.vault.require_string(secret::VAULT_ROOT_TOKEN)?;
    git_credentials_env(ctx, session, env)?;
    env.insert("VAULT_ADDR".into(), addr);
    env.insert("VAULT_TOKEN".into(), token);
    Ok(())
}

fn vault_env(
    ctx: &StepContext<'_>,
    session: &InstallSession,
    vault_addr: Option<&str>,
    env: &mut EnvMap,
) -> Result<()> {
    vault_common_env(ctx, session, vault_addr, env)?;
    let git = session.git_provider.as_str();
    let addr = env.get("VAULT_ADDR").cloned().unwrap_or_default();
    let token = env.get("VAULT_TOKEN").cloned().unwrap_or_default();
    let git_token = ctx.vault.require_string(secret::GIT_TOKEN)?;

    env.insert("TF_VAR_vault_addr".into(), addr);
    env.insert("TF_VAR_vault_token".into(), token);
    env.insert(format!("TF_VAR_{}_token", git), git_token);
    env.insert(
        "TF_VAR_atlantis_repo_webhook_secret".into(),
        ctx.vault.require_string(secret::WEBHOOK_ATLANTIS)?,
    );
    env.insert(
        "TF_VAR_atlantis_repo_webhook_url".into(),
        names::atlantis_webhook_url(&session.domain_name),
    );
    env.insert(
        "TF_VAR_kbot_ssh_private_key".into(),
        ctx.vault.require_string(secret::SSH_PRIVATE_KEY)?,
    );
    env.insert(
        "TF_VAR_kbot_ssh_public_key".into(),
        ctx.vault.require_string(secret::SSH_PUBLIC_KEY)?,
    );
    if let Some(var) = session.cloud_provider.token_env_var() {
        let token = ctx
            .vault
            .require_string(&secret::provider_token(session.cloud_provider.as_str()))?;
        env.insert(format!("TF_VAR_{}", var.to_lowercase()), token);
    }
    state_store_env(ctx, env)
}

fn users_env(
    ctx: &StepContext<'_>,
    session: &InstallSession,
    vault_addr: Option<&str>,
    env: &mut EnvMap,
) -> Result<()> {
    vault_common_env(ctx, session, vault_addr, env)?;
    state_store_env(ctx, env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k1_engine::fakes::FakeWorld;
    use k1_engine::{InstallSession, WriteMode};

    fn seed(vault: &k1_engine::Vault, params: &k1_engine::SessionParams) {
        let session = InstallSession::new(params, "abcdefgh12345678".into(), Default::default());
        vault.create_session(&session).unwrap();
        for (name, value) in [
            ("token.civo", "civo-api-token"),
            (secret::GIT_TOKEN, "ghp-token"),
            (secret::WEBHOOK_ATLANTIS, "webhook-secret"),
            (secret::SSH_PUBLIC_KEY, "ssh-ed25519 AAAA kbot"),
            (secret::SSH_PRIVATE_KEY, "private"),
            (secret::STATE_STORE_ACCESS_KEY, "AK"),
            (secret::STATE_STORE_SECRET_KEY, "SK"),
            (secret::VAULT_ROOT_TOKEN, "hvs.root"),
        ] {
            vault.put(name, value, WriteMode::Once).unwrap();
        }
    }

    #[test]
    fn test_git_env() {
        let world = FakeWorld::new();
        let harness = world.context_harness();
        seed(&harness.vault, &harness.params);
        let ctx = harness.context("terraform-apply-github");

        let env = build(&ctx, Subsystem::Git, None).unwrap();
        assert_eq!(env["GITHUB_TOKEN"], "ghp-token");
        assert_eq!(env["GITHUB_OWNER"], "acme");
        assert_eq!(
            env["TF_VAR_atlantis_repo_webhook_url"],
            "https://atlantis.example.test/events"
        );
        assert_eq!(env["AWS_ACCESS_KEY_ID"], "AK");
        assert!(env["TF_DATA_DIR"].ends_with("kf/terraform/github"));
    }

    #[test]
    fn test_cloud_env_carries_provider_token() {
        let world = FakeWorld::new();
        let harness = world.context_harness();
        seed(&harness.vault, &harness.params);
        let ctx = harness.context("terraform-apply-civo");

        let env = build(&ctx, Subsystem::Cloud, None).unwrap();
        assert_eq!(env["CIVO_TOKEN"], "civo-api-token");
        assert_eq!(env["TF_VAR_civo_token"], "civo-api-token");
        assert_eq!(env["TF_VAR_region"], "nyc1");
        assert!(env["TF_VAR_kubeconfig_path"].ends_with("kf/kubeconfig"));
    }

    #[test]
    fn test_vault_env_uses_forward_address() {
        let world = FakeWorld::new();
        let harness = world.context_harness();
        seed(&harness.vault, &harness.params);
        let ctx = harness.context("terraform-apply-vault");

        let env = build(&ctx, Subsystem::Vault, Some("http://localhost:18200")).unwrap();
        assert_eq!(env["VAULT_ADDR"], "http://localhost:18200");
        assert_eq!(env["TF_VAR_vault_addr"], "http://localhost:18200");
        assert_eq!(env["VAULT_TOKEN"], "hvs.root");
        assert_eq!(env["TF_VAR_github_token"], "ghp-token");
    }

    #[test]
    fn test_missing_secret_is_internal() {
        let world = FakeWorld::new();
        let harness = world.context_harness();
        let session =
            InstallSession::new(&harness.params, "abcdefgh12345678".into(), Default::default());
        harness.vault.create_session(&session).unwrap();
        let ctx = harness.context("terraform-apply-github");

        let err = build(&ctx, Subsystem::Git, None).unwrap_err();
        assert_eq!(err.kind(), k1_engine::ErrorKind::Internal);
    }
}
