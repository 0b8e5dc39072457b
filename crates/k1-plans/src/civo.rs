//! Civo: managed cluster, object store for terraform state, civo DNS.

use crate::common::{git_phase, platform_phase, terraform_step};
use crate::steps::{
    CloudCredentials, CreateStateStoreBucket, CreateStateStoreCredential, DeleteStateStoreBucket,
    DeleteStateStoreCredential, DomainLiveness, QuotaCheck,
};
use crate::tfenv::Subsystem;
use crate::{PlanOptions, keys};
use k1_engine::{CloudProvider, GitProvider, Plan, Step, StepKind};
use std::sync::Arc;

pub fn plan(git: GitProvider, options: Arc<PlanOptions>) -> Plan {
    let preflight = vec![
        Step::new(keys::CLOUD_CREDENTIALS, StepKind::CredentialCapture, CloudCredentials),
        Step::new(
            keys::STATE_STORE_CREDS,
            StepKind::CloudResource,
            CreateStateStoreCredential,
        )
        .with_inverse(DeleteStateStoreCredential),
        Step::new(
            keys::DOMAIN_LIVENESS,
            StepKind::CloudResource,
            DomainLiveness {
                options: options.clone(),
            },
        ),
        Step::new(
            keys::STATE_STORE_CREATE,
            StepKind::CloudResource,
            CreateStateStoreBucket,
        )
        .with_inverse(DeleteStateStoreBucket),
        Step::new(keys::QUOTA_CHECK, StepKind::LocalState, QuotaCheck),
    ];
    let cluster = vec![terraform_step(
        keys::terraform_apply_cloud(CloudProvider::Civo),
        Subsystem::Cloud,
        &options,
    )];

    preflight
        .into_iter()
        .chain(git_phase(git, &options))
        .chain(cluster)
        .chain(platform_phase(&options))
        .fold(
            Plan::new(CloudProvider::Civo.as_str())
                .applicable_when(move |p| p.cloud_provider == CloudProvider::Civo && p.git_provider == git),
            Plan::step,
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        let plan = plan(GitProvider::Github, Arc::new(PlanOptions::default()));
        assert_eq!(
            plan.keys(),
            vec![
                "cloud-credentials",
                "state-store-creds",
                "domain-liveness",
                "state-store-create",
                "quota-check",
                "git-credentials",
                "kbot-setup",
                "tools-downloaded",
                "gitops-ready-to-push",
                "terraform-apply-github",
                "gitops-repo-pushed",
                "terraform-apply-civo",
                "k8s-secrets-created",
                "argocd-install",
                "argocd-credentials-set",
                "argocd-create-registry",
                "vault-initialized",
                "terraform-apply-vault",
                "terraform-apply-users",
            ]
        );
    }

    #[test]
    fn test_reversible_and_guarded_steps() {
        let plan = plan(GitProvider::Gitlab, Arc::new(PlanOptions::default()));
        let reversible: Vec<&str> = plan
            .steps()
            .iter()
            .filter(|s| s.is_reversible())
            .map(|s| s.key())
            .collect();
        assert_eq!(
            reversible,
            vec![
                "state-store-creds",
                "state-store-create",
                "terraform-apply-gitlab",
                "terraform-apply-civo",
                "terraform-apply-vault",
                "terraform-apply-users",
            ]
        );
        let guarded: Vec<&str> = plan
            .steps()
            .iter()
            .filter(|s| !s.is_idempotent())
            .map(|s| s.key())
            .collect();
        assert_eq!(guarded, vec!["gitops-repo-pushed", "k8s-secrets-created"]);
    }

    #[test]
    fn test_applies_only_to_civo_with_its_git_provider() {
        let plan = plan(GitProvider::Github, Arc::new(PlanOptions::default()));
        let mut params = k1_engine::fakes::sample_params();
        assert!(plan.applies_to(&params));
        params.git_provider = GitProvider::Gitlab;
        assert!(!plan.applies_to(&params));
        params.git_provider = GitProvider::Github;
        params.cloud_provider = CloudProvider::K3d;
        assert!(!plan.applies_to(&params));
    }
}
