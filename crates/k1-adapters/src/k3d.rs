//! Local clusters through the `k3d` CLI

use crate::error::AdapterError;
use crate::kubectl::write_kubeconfig;
use crate::process::Cmd;
use async_trait::async_trait;
use k1_engine::adapter::{BucketInfo, ClusterSpec, CloudApi, ObjectStoreCredential, QuotaUsage};
use k1_engine::Result;
use serde::Deserialize;
use std::collections::BTreeMap;

/// A local k3d cluster. Nothing but the cluster itself exists locally, so
/// the object store and DNS calls are refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct K3dCli;

fn unsupported<T>(what: &str) -> Result<T> {
    Err(AdapterError::Unsupported(format!("{} on a local k3d cluster", what)).into())
}

#[derive(Debug, Deserialize)]
struct ListedCluster {
    name: String,
}

fn cluster_listed(json: &str, name: &str) -> std::result::Result<bool, AdapterError> {
    if json.trim().is_empty() {
        return Ok(false);
    }
    let clusters: Vec<ListedCluster> = serde_json::from_str(json)?;
    Ok(clusters.iter().any(|c| c.name == name))
}

fn create_args(spec: &ClusterSpec) -> Vec<String> {
    vec![
        "cluster".into(),
        "create".into(),
        spec.name.clone(),
        "--agents".into(),
        spec.node_count.to_string(),
        "--wait".into(),
        "--kubeconfig-update-default=false".into(),
        "--kubeconfig-switch-context=false".into(),
    ]
}

#[async_trait]
impl CloudApi for K3dCli {
    async fn create_object_store_bucket(&self, _name: &str, _region: &str) -> Result<BucketInfo> {
        unsupported("object store buckets")
    }

    async fn delete_object_store_bucket(&self, _name: &str, _region: &str) -> Result<()> {
        unsupported("object store buckets")
    }

    async fn create_object_store_credential(
        &self,
        _name: &str,
        _region: &str,
    ) -> Result<ObjectStoreCredential> {
        unsupported("object store credentials")
    }

    async fn delete_object_store_credential(&self, _name: &str, _region: &str) -> Result<()> {
        unsupported("object store credentials")
    }

    async fn resolve_dns_zone(&self, _domain: &str) -> Result<String> {
        unsupported("dns zones")
    }

    async fn probe_dns_liveness(&self, _domain: &str, _zone_id: &str) -> Result<bool> {
        unsupported("dns liveness")
    }

    async fn create_kubernetes_cluster(&self, spec: &ClusterSpec) -> Result<()> {
        let listed = Cmd::new("k3d")
            .args(["cluster", "list", "--output", "json"])
            .run()
            .await?;
        if cluster_listed(&listed, &spec.name)? {
            tracing::info!(cluster = %spec.name, "k3d cluster already exists");
        } else {
            Cmd::new("k3d").args(create_args(spec)).run().await?;
            tracing::info!(cluster = %spec.name, "created k3d cluster");
        }

        let kubeconfig = Cmd::new("k3d")
            .args(["kubeconfig", "get", spec.name.as_str()])
            .run()
            .await?;
        write_kubeconfig(&spec.kubeconfig_path, &kubeconfig).await
    }

    async fn delete_kubernetes_cluster(&self, name: &str) -> Result<()> {
        Cmd::new("k3d").args(["cluster", "delete", name]).run().await?;
        Ok(())
    }

    async fn get_quotas(
        &self,
        _region: &str,
        _services: &[&str],
    ) -> Result<BTreeMap<String, Vec<QuotaUsage>>> {
        Ok(BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_create_args_keep_default_kubeconfig_untouched() {
        let spec = ClusterSpec {
            name: "kf".into(),
            region: "local".into(),
            node_count: 3,
            node_type: String::new(),
            kubeconfig_path: PathBuf::from("/tmp/kubeconfig"),
        };
        let args = create_args(&spec);
        assert_eq!(&args[..3], ["cluster", "create", "kf"]);
        assert!(args.contains(&"--kubeconfig-update-default=false".to_string()));
        assert!(args.contains(&"3".to_string()));
    }

    #[test]
    fn test_cluster_listed() {
        let json = r#"[{"name": "kf", "serversCount": 1}, {"name": "other"}]"#;
        assert!(cluster_listed(json, "kf").unwrap());
        assert!(!cluster_listed(json, "kf2").unwrap());
        assert!(!cluster_listed("", "kf").unwrap());
    }

    #[tokio::test]
    async fn test_object_store_is_refused() {
        let err = K3dCli.create_object_store_bucket("b", "local").await.unwrap_err();
        assert_eq!(err.kind(), k1_engine::ErrorKind::Precondition);
    }
}
