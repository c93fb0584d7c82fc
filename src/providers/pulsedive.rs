//! PulseDive provider adapter

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::models::{Indicator, IndicatorType, Source};
use crate::providers::{http_client, AdapterError, ProviderAdapter};

const PULSEDIVE_API_URL: &str = "https://pulsedive.com/api";

/// PulseDive provider adapter. The API key travels in the query string,
/// not a header.
pub struct PulseDiveAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl PulseDiveAdapter {
    /// Create a new PulseDive adapter
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, PULSEDIVE_API_URL.to_string())
    }

    /// Create an adapter against a custom API endpoint
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl ProviderAdapter for PulseDiveAdapter {
    fn name(&self) -> &'static str {
        "PulseDive"
    }

    fn source(&self) -> Source {
        Source::PulseDive
    }

    fn supports(&self, _indicator_type: IndicatorType) -> bool {
        true
    }

    async fn lookup(&self, indicator: &Indicator) -> Result<Option<Value>, AdapterError> {
        let response = self
            .client
            .get(format!("{}/info.php", self.base_url))
            .query(&[
                ("indicator", indicator.value.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Status { status, body });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;

        Ok(Some(raw))
    }
}
