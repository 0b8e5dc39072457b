//! Install plans for k1
//!
//! Each supported cloud gets one [`Plan`]: an ordered list of steps whose
//! effects are defined in [`steps`]. Destroy walks the same plan backwards,
//! so there is no separate destroy definition.
//!
//! ```text
//! civo:  cloud-credentials → state-store-creds → domain-liveness
//!        → state-store-create → quota-check → git-credentials → kbot-setup
//!        → tools-downloaded → gitops-ready-to-push → terraform-apply-<git>
//!        → gitops-repo-pushed → terraform-apply-civo → k8s-secrets-created
//!        → argocd-install → argocd-credentials-set → argocd-create-registry
//!        → vault-initialized → terraform-apply-vault → terraform-apply-users
//!
//! k3d:   local-credentials → git-credentials → kbot-setup → tools-downloaded
//!        → gitops-ready-to-push → terraform-apply-<git> → gitops-repo-pushed
//!        → create-k3d-cluster → k8s-secrets-created → argocd-install → ...
//! ```

pub mod civo;
mod common;
pub mod k3d;
pub mod keys;
pub mod manifests;
pub mod names;
pub mod quota;
pub mod steps;
pub mod templates;
pub mod tfenv;

use k1_config::{Ports, Settings, TemplateSource, Timeouts, ToolVersions};
use k1_engine::{CloudProvider, GitProvider, Plan};
use std::sync::Arc;

/// Inputs the plans need beyond the session parameters.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Use this bot password instead of generating one
    pub kbot_password: Option<String>,
    pub gitops_template: TemplateSource,
    pub metaphor_template: TemplateSource,
    pub ports: Ports,
    pub timeouts: Timeouts,
    pub tools: ToolVersions,
    pub node_count: u32,
    pub node_type: String,
}

impl PlanOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            kbot_password: None,
            gitops_template: settings.gitops_template.clone(),
            metaphor_template: settings.metaphor_template.clone(),
            ports: settings.ports,
            timeouts: settings.timeouts,
            tools: settings.tools.clone(),
            node_count: 3,
            node_type: "g4s.kube.large".to_string(),
        }
    }
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// The plan for `cloud`, with git-provider specific step keys.
pub fn plan_for(cloud: CloudProvider, git: GitProvider, options: PlanOptions) -> Plan {
    let options = Arc::new(options);
    match cloud {
        CloudProvider::Civo => civo::plan(git, options),
        CloudProvider::K3d => k3d::plan(git, options),
    }
}
