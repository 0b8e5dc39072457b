//! Civo API client

use crate::error::AdapterError;
use crate::http;
use crate::kubectl::write_kubeconfig;
use crate::process::Cmd;
use async_trait::async_trait;
use k1_engine::adapter::{
    BucketInfo, ClusterSpec, CloudApi, EnvSource, ObjectStoreCredential, QuotaUsage,
};
use k1_engine::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const CIVO_API_BASE: &str = "https://api.civo.com/v2";
const TOKEN_VAR: &str = "CIVO_TOKEN";
const STATE_STORE_SIZE_GB: u32 = 500;

const LIVENESS_RECORD: &str = "k1-liveness";
const LIVENESS_VALUE: &str = "domain record propagated";
const LIVENESS_ATTEMPTS: u32 = 60;
const LIVENESS_INTERVAL: Duration = Duration::from_secs(10);

const CLUSTER_POLL: Duration = Duration::from_secs(15);

/// Quota fields reported by `/quota`, grouped by service.
const QUOTA_FIELDS: &[(&str, &[&str])] = &[
    (
        "compute",
        &["instance_count", "cpu_core", "ram_mb", "disk_gb", "disk_volume_count"],
    ),
    (
        "network",
        &["network_count", "public_ip_address", "security_group", "loadbalancer_count"],
    ),
    ("objectstore", &["objectstore_gb"]),
];

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ObjectStore {
    id: String,
    name: String,
    #[serde(default)]
    objectstore_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Credential {
    id: String,
    name: String,
    #[serde(default)]
    access_key_id: String,
    #[serde(default)]
    secret_access_key: String,
}

#[derive(Debug, Deserialize)]
struct Domain {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Record {
    name: String,
    #[serde(default)]
    value: String,
    #[serde(rename = "type", default)]
    record_type: String,
}

#[derive(Debug, Deserialize)]
struct Cluster {
    id: String,
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    kubeconfig: Option<String>,
}

pub struct CivoApi {
    client: reqwest::Client,
    env: Arc<dyn EnvSource>,
    base: String,
}

impl CivoApi {
    pub fn new(env: Arc<dyn EnvSource>) -> Self {
        Self {
            client: http::client(),
            env,
            base: CIVO_API_BASE.to_string(),
        }
    }

    fn token(&self) -> Result<String> {
        self.env
            .var(TOKEN_VAR)
            .ok_or_else(|| Error::precondition(format!("{} is not set", TOKEN_VAR)))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let request = self
            .client
            .get(self.url(path))
            .bearer_auth(self.token()?)
            .query(query);
        let response = http::send(&self.client, request).await?;
        Ok(response.json().await.map_err(AdapterError::from)?)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let request = self
            .client
            .post(self.url(path))
            .bearer_auth(self.token()?)
            .json(&body);
        let response = http::send(&self.client, request).await?;
        Ok(response.json().await.map_err(AdapterError::from)?)
    }

    async fn delete(&self, path: &str, region: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.url(path))
            .bearer_auth(self.token()?)
            .query(&[("region", region)]);
        http::send(&self.client, request).await?;
        Ok(())
    }

    async fn find_bucket(&self, name: &str, region: &str) -> Result<Option<ObjectStore>> {
        let page: Page<ObjectStore> = self.get("/objectstores", &[("region", region)]).await?;
        Ok(page.items.into_iter().find(|b| b.name == name))
    }

    async fn find_credential(&self, name: &str, region: &str) -> Result<Option<Credential>> {
        let page: Page<Credential> = self
            .get("/objectstore/credentials", &[("region", region)])
            .await?;
        Ok(page.items.into_iter().find(|c| c.name == name))
    }

    async fn find_cluster(&self, name: &str, region: Option<&str>) -> Result<Option<Cluster>> {
        let query: Vec<(&str, &str)> = region.map(|r| vec![("region", r)]).unwrap_or_default();
        let page: Page<Cluster> = self.get("/kubernetes/clusters", &query).await?;
        Ok(page.items.into_iter().find(|c| c.name == name))
    }

    async fn ensure_liveness_record(&self, domain: &str, zone_id: &str) -> Result<()> {
        let records: Vec<Record> = self.get(&format!("/dns/{}/records", zone_id), &[]).await?;
        let present = records.iter().any(|r| {
            r.record_type.eq_ignore_ascii_case("txt")
                && r.name == LIVENESS_RECORD
                && r.value == LIVENESS_VALUE
        });
        if present {
            return Ok(());
        }
        let _: Value = self
            .post(
                &format!("/dns/{}/records", zone_id),
                json!({
                    "type": "TXT",
                    "name": LIVENESS_RECORD,
                    "value": LIVENESS_VALUE,
                    "ttl": 600,
                }),
            )
            .await?;
        tracing::debug!(domain = %domain, "created liveness record");
        Ok(())
    }
}

fn bucket_location(bucket: &ObjectStore) -> String {
    match &bucket.objectstore_endpoint {
        Some(endpoint) if !endpoint.is_empty() => {
            format!("https://{}/{}", endpoint.trim_start_matches("https://"), bucket.name)
        }
        _ => bucket.name.clone(),
    }
}

/// The zone whose name is the longest suffix of `domain`.
fn pick_zone<'a>(domains: &'a [Domain], domain: &str) -> Option<&'a Domain> {
    domains
        .iter()
        .filter(|d| domain == d.name || domain.ends_with(&format!(".{}", d.name)))
        .max_by_key(|d| d.name.len())
}

fn parse_quotas(
    raw: &Map<String, Value>,
    services: &[&str],
) -> BTreeMap<String, Vec<QuotaUsage>> {
    let number = |key: String| raw.get(&key).and_then(Value::as_u64);
    QUOTA_FIELDS
        .iter()
        .filter(|(service, _)| services.contains(service))
        .map(|(service, fields)| {
            let usages = fields
                .iter()
                .filter_map(|field| {
                    let limit = number(format!("{}_limit", field))?;
                    let used = number(format!("{}_usage", field)).unwrap_or(0);
                    Some(QuotaUsage {
                        name: field.to_string(),
                        used,
                        limit,
                    })
                })
                .collect();
            (service.to_string(), usages)
        })
        .collect()
}

fn txt_values(dig_output: &str) -> Vec<String> {
    dig_output
        .lines()
        .map(|line| line.trim().trim_matches('"').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[async_trait]
impl CloudApi for CivoApi {
    async fn create_object_store_bucket(&self, name: &str, region: &str) -> Result<BucketInfo> {
        let bucket = match self.find_bucket(name, region).await? {
            Some(existing) => existing,
            None => {
                self.post(
                    "/objectstores",
                    json!({ "name": name, "max_size_gb": STATE_STORE_SIZE_GB, "region": region }),
                )
                .await?
            }
        };
        tracing::debug!(bucket = %bucket.name, id = %bucket.id, "object store ready");
        Ok(BucketInfo {
            location: bucket_location(&bucket),
            name: bucket.name,
        })
    }

    async fn delete_object_store_bucket(&self, name: &str, region: &str) -> Result<()> {
        let bucket = self
            .find_bucket(name, region)
            .await?
            .ok_or_else(|| Error::NotFound(format!("object store {}", name)))?;
        self.delete(&format!("/objectstores/{}", bucket.id), region).await
    }

    async fn create_object_store_credential(
        &self,
        name: &str,
        region: &str,
    ) -> Result<ObjectStoreCredential> {
        let credential = match self.find_credential(name, region).await? {
            Some(existing) => existing,
            None => {
                self.post(
                    "/objectstore/credentials",
                    json!({ "name": name, "region": region }),
                )
                .await?
            }
        };
        tracing::debug!(credential = %credential.name, id = %credential.id, "object store credential ready");
        Ok(ObjectStoreCredential {
            access_key: credential.access_key_id,
            secret_key: credential.secret_access_key,
        })
    }

    async fn delete_object_store_credential(&self, name: &str, region: &str) -> Result<()> {
        let credential = self
            .find_credential(name, region)
            .await?
            .ok_or_else(|| Error::NotFound(format!("object store credential {}", name)))?;
        self.delete(&format!("/objectstore/credentials/{}", credential.id), region)
            .await
    }

    async fn resolve_dns_zone(&self, domain: &str) -> Result<String> {
        let domains: Vec<Domain> = self.get("/dns", &[]).await?;
        pick_zone(&domains, domain)
            .map(|d| d.id.clone())
            .ok_or_else(|| Error::NotFound(format!("no civo dns zone serves {}", domain)))
    }

    async fn probe_dns_liveness(&self, domain: &str, zone_id: &str) -> Result<bool> {
        self.ensure_liveness_record(domain, zone_id).await?;
        let fqdn = format!("{}.{}", LIVENESS_RECORD, domain);
        for attempt in 1..=LIVENESS_ATTEMPTS {
            let out = Cmd::new("dig").args(["+short", "TXT", fqdn.as_str()]).run().await?;
            if txt_values(&out).iter().any(|v| v == LIVENESS_VALUE) {
                return Ok(true);
            }
            tracing::debug!(record = %fqdn, attempt, "liveness record not resolvable yet");
            tokio::time::sleep(LIVENESS_INTERVAL).await;
        }
        Ok(false)
    }

    async fn create_kubernetes_cluster(&self, spec: &ClusterSpec) -> Result<()> {
        let cluster = match self.find_cluster(&spec.name, Some(&spec.region)).await? {
            Some(existing) => existing,
            None => {
                self.post(
                    "/kubernetes/clusters",
                    json!({
                        "name": spec.name,
                        "region": spec.region,
                        "num_target_nodes": spec.node_count,
                        "target_nodes_size": spec.node_type,
                    }),
                )
                .await?
            }
        };

        loop {
            let current: Cluster = self
                .get(
                    &format!("/kubernetes/clusters/{}", cluster.id),
                    &[("region", spec.region.as_str())],
                )
                .await?;
            match current.status.as_str() {
                "ACTIVE" => {
                    let kubeconfig = current.kubeconfig.ok_or_else(|| {
                        Error::from(AdapterError::Unexpected(format!(
                            "cluster {} is active but has no kubeconfig",
                            spec.name
                        )))
                    })?;
                    return write_kubeconfig(&spec.kubeconfig_path, &kubeconfig).await;
                }
                "ERROR" | "FAILED" => {
                    return Err(AdapterError::Unexpected(format!(
                        "cluster {} failed to provision",
                        spec.name
                    ))
                    .into());
                }
                status => {
                    tracing::debug!(cluster = %spec.name, status, "cluster not active yet");
                    tokio::time::sleep(CLUSTER_POLL).await;
                }
            }
        }
    }

    async fn delete_kubernetes_cluster(&self, name: &str) -> Result<()> {
        let cluster = self
            .find_cluster(name, None)
            .await?
            .ok_or_else(|| Error::NotFound(format!("kubernetes cluster {}", name)))?;
        let request = self
            .client
            .delete(self.url(&format!("/kubernetes/clusters/{}", cluster.id)))
            .bearer_auth(self.token()?);
        http::send(&self.client, request).await?;
        Ok(())
    }

    async fn get_quotas(
        &self,
        region: &str,
        services: &[&str],
    ) -> Result<BTreeMap<String, Vec<QuotaUsage>>> {
        let raw: Map<String, Value> = self.get("/quota", &[("region", region)]).await?;
        Ok(parse_quotas(&raw, services))
    }
}
