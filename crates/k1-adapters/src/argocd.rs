//! Argo CD session API

use crate::error::AdapterError;
use crate::http;
use async_trait::async_trait;
use k1_engine::Result;
use k1_engine::adapter::ArgoCdApi;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct Session {
    token: String,
}

pub struct ArgoCdHttp {
    client: reqwest::Client,
}

impl ArgoCdHttp {
    pub fn new() -> Self {
        Self {
            client: http::client(),
        }
    }
}

impl Default for ArgoCdHttp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArgoCdApi for ArgoCdHttp {
    async fn session_token(&self, base_url: &str, username: &str, password: &str) -> Result<String> {
        let request = self
            .client
            .post(format!("{}/api/v1/session", base_url.trim_end_matches('/')))
            .json(&json!({ "username": username, "password": password }));
        let response = http::send(&self.client, request).await?;
        let session: Session = response.json().await.map_err(AdapterError::from)?;
        Ok(session.token)
    }
}
