//! Shared HTTP plumbing

use crate::error::{AdapterError, Result};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

const USER_AGENT: &str = concat!("k1/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ERROR_BODY: usize = 512;

pub fn client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Send `request`, turning any non-success status into [`AdapterError::Status`].
pub async fn send(client: &Client, request: RequestBuilder) -> Result<Response> {
    let request = request.build()?;
    let method = request.method().to_string();
    let url = redact(request.url());
    tracing::debug!("{} {}", method, url);

    let response = client.execute(request).await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    Err(AdapterError::Status {
        method,
        url,
        status: status.as_u16(),
        body,
    })
}

/// The URL without query string or credentials.
fn redact(url: &reqwest::Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    let _ = url.set_password(None);
    let _ = url.set_username("");
    url.to_string()
}

/// Percent-encode a `namespace/name` path for APIs that take it as one segment.
pub fn encode_path(path: &str) -> String {
    path.replace('/', "%2F")
}
