//! VirusTotal provider adapter

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use reqwest::Client;
use serde_json::Value;

use crate::models::{Indicator, IndicatorType, Source};
use crate::providers::{http_client, AdapterError, ProviderAdapter};

const VT_API_URL: &str = "https://www.virustotal.com/api/v3";

/// VirusTotal provider adapter
pub struct VirusTotalAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl VirusTotalAdapter {
    /// Create a new VirusTotal adapter
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, VT_API_URL.to_string())
    }

    /// Create an adapter against a custom API endpoint
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            base_url,
        }
    }

    fn endpoint(&self, indicator: &Indicator) -> String {
        match indicator.indicator_type {
            IndicatorType::Ip => format!("{}/ip_addresses/{}", self.base_url, indicator.value),
            IndicatorType::Domain => format!("{}/domains/{}", self.base_url, indicator.value),
            IndicatorType::Hash => format!("{}/files/{}", self.base_url, indicator.value),
            // URLs are addressed by their unpadded URL-safe base64 id
            IndicatorType::Url => {
                let url_id = URL_SAFE_NO_PAD.encode(&indicator.value);
                format!("{}/urls/{}", self.base_url, url_id)
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for VirusTotalAdapter {
    fn name(&self) -> &'static str {
        "VirusTotal"
    }

    fn source(&self) -> Source {
        Source::VirusTotal
    }

    fn supports(&self, _indicator_type: IndicatorType) -> bool {
        true
    }

    async fn lookup(&self, indicator: &Indicator) -> Result<Option<Value>, AdapterError> {
        let response = self
            .client
            .get(self.endpoint(indicator))
            .header("x-apikey", &self.api_key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

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
