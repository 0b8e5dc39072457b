//! k3d: a local cluster in containers. No cloud credentials, state store,
//! DNS or quota.

use crate::common::{git_phase, platform_phase};
use crate::steps::{CloudCredentials, CreateLocalCluster, DeleteLocalCluster};
use crate::{PlanOptions, keys};
use k1_engine::{CloudProvider, GitProvider, Plan, Step, StepKind};
use std::sync::Arc;

pub fn plan(git: GitProvider, options: Arc<PlanOptions>) -> Plan {
    let session = vec![Step::new(
        keys::LOCAL_CREDENTIALS,
        StepKind::CredentialCapture,
        CloudCredentials,
    )];
    let cluster = vec![
        Step::new(
            keys::CREATE_K3D_CLUSTER,
            StepKind::CloudResource,
            CreateLocalCluster {
                options: options.clone(),
            },
        )
        .with_inverse(DeleteLocalCluster),
    ];

    session
        .into_iter()
        .chain(git_phase(git, &options))
        .chain(cluster)
        .chain(platform_phase(&options))
        .fold(
            Plan::new(CloudProvider::K3d.as_str())
                .applicable_when(move |p| p.cloud_provider.is_local() && p.git_provider == git),
            Plan::step,
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_plan_skips_cloud_steps() {
        let plan = plan(GitProvider::Github, Arc::new(PlanOptions::default()));
        let keys = plan.keys();
        assert_eq!(keys[0], "local-credentials");
        assert!(!keys.contains(&"state-store-create"));
        assert!(!keys.contains(&"quota-check"));
        let cluster = keys.iter().position(|k| *k == "create-k3d-cluster").unwrap();
        assert_eq!(keys[cluster - 1], "gitops-repo-pushed");
        assert_eq!(keys[cluster + 1], "k8s-secrets-created");
        assert!(plan.get("create-k3d-cluster").unwrap().is_reversible());
        assert_eq!(plan.steps().len(), 15);
    }
}
