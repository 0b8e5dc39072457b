//! Checkpoint keys of every step the plans use

use k1_engine::{CloudProvider, GitProvider};

pub const CLOUD_CREDENTIALS: &str = "cloud-credentials";
pub const LOCAL_CREDENTIALS: &str = "local-credentials";
pub const STATE_STORE_CREDS: &str = "state-store-creds";
pub const DOMAIN_LIVENESS: &str = "domain-liveness";
pub const STATE_STORE_CREATE: &str = "state-store-create";
pub const QUOTA_CHECK: &str = "quota-check";
pub const GIT_CREDENTIALS: &str = "git-credentials";
pub const KBOT_SETUP: &str = "kbot-setup";
pub const TOOLS_DOWNLOADED: &str = "tools-downloaded";
pub const GITOPS_READY_TO_PUSH: &str = "gitops-ready-to-push";
pub const GITOPS_REPO_PUSHED: &str = "gitops-repo-pushed";
pub const CREATE_K3D_CLUSTER: &str = "create-k3d-cluster";
pub const K8S_SECRETS_CREATED: &str = "k8s-secrets-created";
pub const ARGOCD_INSTALL: &str = "argocd-install";
pub const ARGOCD_CREDENTIALS_SET: &str = "argocd-credentials-set";
pub const ARGOCD_CREATE_REGISTRY: &str = "argocd-create-registry";
pub const VAULT_INITIALIZED: &str = "vault-initialized";
pub const TERRAFORM_APPLY_VAULT: &str = "terraform-apply-vault";
pub const TERRAFORM_APPLY_USERS: &str = "terraform-apply-users";

/// `terraform-apply-<subsystem>`
pub fn terraform_apply(subsystem: &str) -> String {
    format!("terraform-apply-{}", subsystem)
}

pub fn terraform_apply_git(git: GitProvider) -> String {
    terraform_apply(git.as_str())
}

pub fn terraform_apply_cloud(cloud: CloudProvider) -> String {
    terraform_apply(cloud.as_str())
}
