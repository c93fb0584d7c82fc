//! Provider adapters for upstream reputation services

pub mod abuseipdb;
pub mod pulsedive;
pub mod threatfox;
pub mod virustotal;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Indicator, IndicatorType, Source};

/// Uniform failure signal for a single provider call.
///
/// An adapter never lets a transport fault, bad status, or unparseable
/// body escape as anything else; the orchestrator treats all variants as
/// "this source contributed nothing this round".
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("malformed response body: {0}")]
    Malformed(String),
}

/// Trait for provider adapters
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Display name used in status events
    fn name(&self) -> &'static str;

    /// The source this adapter queries
    fn source(&self) -> Source;

    /// Check if this adapter can look up the given indicator type
    fn supports(&self, indicator_type: IndicatorType) -> bool;

    /// Perform one lookup. `Ok(None)` means the provider had nothing to
    /// report (or does not handle this indicator type).
    async fn lookup(&self, indicator: &Indicator) -> Result<Option<Value>, AdapterError>;
}

/// Shared HTTP client with distinct connect and total timeouts
pub(crate) fn http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to create HTTP client")
}
