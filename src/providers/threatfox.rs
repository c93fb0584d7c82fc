//! ThreatFox provider adapter

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::models::{Indicator, IndicatorType, Source};
use crate::providers::{http_client, AdapterError, ProviderAdapter};

const THREATFOX_API_URL: &str = "https://threatfox-api.abuse.ch/api/v1/";

/// ThreatFox provider adapter; lookups go through the search_ioc query
/// of the POST API.
pub struct ThreatFoxAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ThreatFoxAdapter {
    /// Create a new ThreatFox adapter
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, THREATFOX_API_URL.to_string())
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
impl ProviderAdapter for ThreatFoxAdapter {
    fn name(&self) -> &'static str {
        "ThreatFox"
    }

    fn source(&self) -> Source {
        Source::ThreatFox
    }

    fn supports(&self, _indicator_type: IndicatorType) -> bool {
        true
    }

    async fn lookup(&self, indicator: &Indicator) -> Result<Option<Value>, AdapterError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("API-KEY", &self.api_key)
            .json(&json!({
                "query": "search_ioc",
                "search_term": indicator.value,
            }))
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
