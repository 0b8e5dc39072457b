//! Vault `sys/init` API

use crate::error::AdapterError;
use crate::http;
use async_trait::async_trait;
use k1_engine::Result;
use k1_engine::adapter::{VaultApi, VaultInit};
use serde::Deserialize;
use serde_json::json;

const SECRET_SHARES: u8 = 3;
const SECRET_THRESHOLD: u8 = 2;

#[derive(Debug, Deserialize)]
struct InitStatus {
    initialized: bool,
}

#[derive(Deserialize)]
struct InitResponse {
    #[serde(default)]
    keys: Vec<String>,
    root_token: String,
}

pub struct VaultHttp {
    client: reqwest::Client,
}

impl VaultHttp {
    pub fn new() -> Self {
        Self {
            client: http::client(),
        }
    }
}

impl Default for VaultHttp {
    fn default() -> Self {
        Self::new()
    }
}

fn init_url(base_url: &str) -> String {
    format!("{}/v1/sys/init", base_url.trim_end_matches('/'))
}

#[async_trait]
impl VaultApi for VaultHttp {
    async fn is_initialized(&self, base_url: &str) -> Result<bool> {
        let response = http::send(&self.client, self.client.get(init_url(base_url))).await?;
        let status: InitStatus = response.json().await.map_err(AdapterError::from)?;
        Ok(status.initialized)
    }

    async fn initialize(&self, base_url: &str) -> Result<VaultInit> {
        let request = self.client.put(init_url(base_url)).json(&json!({
            "secret_shares": SECRET_SHARES,
            "secret_threshold": SECRET_THRESHOLD,
        }));
        let response = http::send(&self.client, request).await?;
        let init: InitResponse = response.json().await.map_err(AdapterError::from)?;
        tracing::info!(shares = init.keys.len(), "vault initialized");
        Ok(VaultInit {
            root_token: init.root_token,
            unseal_keys: init.keys,
        })
    }
}
