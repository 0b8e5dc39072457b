//! Names and URLs derived from the session

use k1_engine::{CloudProvider, GitProvider, InstallSession};

pub const GITOPS_REPO: &str = "gitops";
pub const METAPHOR_REPO: &str = "metaphor";
/// Repositories terraform creates under the git owner.
pub const MANAGED_REPOS: &[&str] = &[GITOPS_REPO, METAPHOR_REPO];
/// Teams terraform creates under the git owner.
pub const MANAGED_TEAMS: &[&str] = &["admins", "developers"];

pub const REMOTE_NAME: &str = "origin";
pub const ARGOCD_ADMIN: &str = "admin";

pub const BOOTSTRAP_NAMESPACE: &str = "k1";
/// Written last by `k8s-secrets-created`; its presence means the step's
/// manifests are all applied.
pub const BOOTSTRAP_SECRET: &str = "k1-bootstrap";

pub const VAULT_NAMESPACE: &str = "vault";
pub const VAULT_UNSEAL_SECRET: &str = "vault-unseal-secret";

const MANIFESTS_REF: &str = "v1.1.0";

/// SSH remote of a repository under the session's git owner.
pub fn repo_url(git: GitProvider, owner: &str, repo: &str) -> String {
    format!("git@{}:{}/{}.git", git.host(), owner, repo)
}

pub fn gitops_repo_url(session: &InstallSession) -> String {
    repo_url(session.git_provider, &session.git_owner, GITOPS_REPO)
}

pub fn metaphor_repo_url(session: &InstallSession) -> String {
    repo_url(session.git_provider, &session.git_owner, METAPHOR_REPO)
}

pub fn atlantis_webhook_url(domain: &str) -> String {
    format!("https://atlantis.{}/events", domain)
}

pub fn argocd_url(domain: &str) -> String {
    format!("https://argocd.{}", domain)
}

pub fn vault_url(domain: &str) -> String {
    format!("https://vault.{}", domain)
}

/// Name of the bot's SSH key at the git provider.
pub fn kbot_ssh_key_name(session: &InstallSession) -> String {
    format!("kbot-{}", session.cluster_name)
}

pub fn state_store_credential(session: &InstallSession) -> String {
    session.scoped_name("k1-state-store-creds")
}

/// Remote kustomization that installs Argo CD.
pub fn argocd_manifests(cloud: CloudProvider) -> String {
    let flavor = if cloud.is_local() { "k3d" } else { "cloud" };
    format!(
        "github.com:kubefirst/manifests/argocd/{}?ref={}",
        flavor, MANIFESTS_REF
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k1_engine::fakes::sample_params;

    fn session() -> InstallSession {
        InstallSession::new(&sample_params(), "abcdefgh12345678".into(), Default::default())
    }

    #[test]
    fn test_repo_urls() {
        let session = session();
        assert_eq!(gitops_repo_url(&session), "git@github.com:acme/gitops.git");
        assert_eq!(metaphor_repo_url(&session), "git@github.com:acme/metaphor.git");
        assert_eq!(
            repo_url(GitProvider::Gitlab, "acme", "gitops"),
            "git@gitlab.com:acme/gitops.git"
        );
    }

    #[test]
    fn test_cluster_id_appended_once() {
        let session = session();
        assert_eq!(
            state_store_credential(&session),
            "k1-state-store-creds-kf-abcdefgh12345678"
        );
        assert_eq!(session.state_store_bucket(), "k1-state-store-kf-abcdefgh12345678");
    }

    #[test]
    fn test_service_urls() {
        assert_eq!(
            atlantis_webhook_url("example.test"),
            "https://atlantis.example.test/events"
        );
        assert!(argocd_manifests(CloudProvider::K3d).contains("argocd/k3d"));
        assert!(argocd_manifests(CloudProvider::Civo).contains("argocd/cloud"));
    }
}
