//! AbuseIPDB provider adapter

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::models::{Indicator, IndicatorType, Source};
use crate::providers::{http_client, AdapterError, ProviderAdapter};

const ABUSEIPDB_API_URL: &str = "https://api.abuseipdb.com/api/v2";

/// AbuseIPDB provider adapter. Only IP indicators are supported; any
/// other type is a no-op rather than a malformed request.
pub struct AbuseIpDbAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AbuseIpDbAdapter {
    /// Create a new AbuseIPDB adapter
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, ABUSEIPDB_API_URL.to_string())
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
impl ProviderAdapter for AbuseIpDbAdapter {
    fn name(&self) -> &'static str {
        "AbuseIPDB"
    }

    fn source(&self) -> Source {
        Source::AbuseIpDb
    }

    fn supports(&self, indicator_type: IndicatorType) -> bool {
        matches!(indicator_type, IndicatorType::Ip)
    }

    async fn lookup(&self, indicator: &Indicator) -> Result<Option<Value>, AdapterError> {
        if !self.supports(indicator.indicator_type) {
            return Ok(None);
        }

        let response = self
            .client
            .get(format!("{}/check", self.base_url))
            .header("Key", &self.api_key)
            .header("Accept", "application/json")
            .query(&[
                ("ipAddress", indicator.value.as_str()),
                ("maxAgeInDays", "90"),
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
