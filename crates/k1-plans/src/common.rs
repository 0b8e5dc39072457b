//! Steps every plan shares: git setup before the cluster exists, and the
//! platform bootstrap after it does.

use crate::steps::{
    ArgoCdCredentials, ArgoCdInstall, ArgoCdRegistry, BootstrapSecrets, GitCredentials,
    GitopsReadyToPush, GitopsRepoPushed, KbotSetup, TerraformApply, TerraformDestroy,
    ToolsDownloaded, VaultInitialized,
};
use crate::tfenv::Subsystem;
use crate::{PlanOptions, keys};
use k1_engine::{GitProvider, Step, StepKind};
use std::sync::Arc;

pub(crate) fn terraform_step(key: String, subsystem: Subsystem, options: &Arc<PlanOptions>) -> Step {
    Step::new(
        key,
        StepKind::TerraformApply,
        TerraformApply {
            subsystem,
            options: options.clone(),
        },
    )
    .with_inverse(TerraformDestroy {
        subsystem,
        options: options.clone(),
    })
}

/// `git-credentials` through `gitops-repo-pushed`.
pub(crate) fn git_phase(git: GitProvider, options: &Arc<PlanOptions>) -> Vec<Step> {
    vec![
        Step::new(keys::GIT_CREDENTIALS, StepKind::CredentialCapture, GitCredentials),
        Step::new(
            keys::KBOT_SETUP,
            StepKind::LocalState,
            KbotSetup {
                options: options.clone(),
            },
        ),
        Step::new(
            keys::TOOLS_DOWNLOADED,
            StepKind::LocalState,
            ToolsDownloaded {
                options: options.clone(),
            },
        ),
        Step::new(
            keys::GITOPS_READY_TO_PUSH,
            StepKind::LocalState,
            GitopsReadyToPush {
                options: options.clone(),
            },
        ),
        terraform_step(keys::terraform_apply_git(git), Subsystem::Git, options),
        Step::new(keys::GITOPS_REPO_PUSHED, StepKind::GitResource, GitopsRepoPushed).guarded(),
    ]
}

/// `k8s-secrets-created` through `terraform-apply-users`.
pub(crate) fn platform_phase(options: &Arc<PlanOptions>) -> Vec<Step> {
    vec![
        Step::new(keys::K8S_SECRETS_CREATED, StepKind::K8sApply, BootstrapSecrets).guarded(),
        Step::new(
            keys::ARGOCD_INSTALL,
            StepKind::K8sApply,
            ArgoCdInstall {
                options: options.clone(),
            },
        ),
        Step::new(
            keys::ARGOCD_CREDENTIALS_SET,
            StepKind::CredentialCapture,
            ArgoCdCredentials {
                options: options.clone(),
            },
        ),
        Step::new(keys::ARGOCD_CREATE_REGISTRY, StepKind::K8sApply, ArgoCdRegistry),
        Step::new(
            keys::VAULT_INITIALIZED,
            StepKind::K8sApply,
            VaultInitialized {
                options: options.clone(),
            },
        ),
        terraform_step(keys::TERRAFORM_APPLY_VAULT.to_string(), Subsystem::Vault, options),
        terraform_step(keys::TERRAFORM_APPLY_USERS.to_string(), Subsystem::Users, options),
    ]
}
