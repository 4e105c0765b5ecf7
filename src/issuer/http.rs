//! HTTP key provider client

use super::KeyProvider;
use crate::config::KeyProviderConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::swap::SwapId;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct IssueRequest<'a> {
    label: &'a str,
}

#[derive(Deserialize)]
struct IssueResponse {
    address: String,
}

/// Requests addresses from an external key service: `POST {url}` with
/// `{"label": <swap id>}`, answered by `{"address": ...}`
pub struct HttpKeyProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpKeyProvider {
    pub fn new(config: &KeyProviderConfig) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| BridgeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl KeyProvider for HttpKeyProvider {
    async fn issue_address(&self, swap_id: &SwapId) -> BridgeResult<String> {
        let label = swap_id.to_string();
        let response: IssueResponse = self
            .client
            .post(&self.url)
            .json(&IssueRequest { label: &label })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BridgeError::AddressIssuance(format!("Key provider unreachable: {}", e)))?
            .json()
            .await
            .map_err(|e| BridgeError::AddressIssuance(format!("Malformed key provider reply: {}", e)))?;

        Ok(response.address)
    }
}
