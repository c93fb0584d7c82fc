//! Core data models for threat enrichment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structural classification of an indicator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorType {
    Ip,
    Domain,
    Hash,
    Url,
}

impl IndicatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorType::Ip => "ip",
            IndicatorType::Domain => "domain",
            IndicatorType::Hash => "hash",
            IndicatorType::Url => "url",
        }
    }
}

impl std::fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a raw indicator string by structural inspection.
///
/// URLs and hashes are recognized first; a value whose dot-separated
/// segments are all digits is an IP; everything else is treated as a
/// domain/generic indicator.
pub fn classify_indicator(value: &str) -> IndicatorType {
    let trimmed = value.trim();

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return IndicatorType::Url;
    }

    // MD5=32, SHA1=40, SHA256=64 hex chars
    if matches!(trimmed.len(), 32 | 40 | 64)
        && trimmed.chars().all(|c| c.is_ascii_hexdigit())
    {
        return IndicatorType::Hash;
    }

    if trimmed.contains('.')
        && trimmed
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()))
    {
        return IndicatorType::Ip;
    }

    IndicatorType::Domain
}

/// An indicator under investigation, classified once at ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indicator {
    pub value: String,
    pub indicator_type: IndicatorType,
}

impl Indicator {
    pub fn classify(value: &str) -> Self {
        let value = value.trim().to_string();
        let indicator_type = classify_indicator(&value);
        Self {
            value,
            indicator_type,
        }
    }
}

/// Upstream reputation providers, in fixed query priority order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Source {
    #[serde(rename = "VirusTotal")]
    VirusTotal,
    #[serde(rename = "AbuseIPDB")]
    AbuseIpDb,
    #[serde(rename = "ThreatFox")]
    ThreatFox,
    #[serde(rename = "PulseDive")]
    PulseDive,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::VirusTotal => "VirusTotal",
            Source::AbuseIpDb => "AbuseIPDB",
            Source::ThreatFox => "ThreatFox",
            Source::PulseDive => "PulseDive",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VirusTotal" => Ok(Source::VirusTotal),
            "AbuseIPDB" => Ok(Source::AbuseIpDb),
            "ThreatFox" => Ok(Source::ThreatFox),
            "PulseDive" => Ok(Source::PulseDive),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Derived threat severity, never supplied directly by a provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Geolocation attached to a record when the provider returns one
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Canonical threat record, one per (indicator, source) pair, latest-wins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatRecord {
    pub indicator: String,
    pub source: Source,
    pub severity: Severity,
    /// Provider-specific fields; schema varies per source
    pub attributes: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A persisted threat record as served by the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredThreat {
    pub id: String,
    pub indicator: String,
    pub source: String,
    pub severity: String,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub attributes: Value,
    pub tags: Vec<String>,
    pub observed_at: DateTime<Utc>,
}

/// Enrichment trigger; additional fields are ignored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichRequest {
    #[serde(default)]
    pub indicator: String,
}

/// Tag trigger; both fields are required
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRequest {
    pub threat_id: String,
    pub tag: String,
}

/// KPI summary over the stored threat collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiSummary {
    pub total_threats: i64,
    pub high_severity: i64,
    pub medium_severity: i64,
    pub unique_indicators: i64,
}

/// A (label, count) aggregation bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountBucket {
    pub name: String,
    pub count: i64,
}
