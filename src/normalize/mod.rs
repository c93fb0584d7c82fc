//! Normalization of raw provider payloads into canonical threat records
//!
//! Each provider's parsing lives entirely in its own branch here; adding a
//! new source means one adapter plus one branch, nothing else.

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::models::{GeoPoint, Severity, Source, ThreatRecord};

/// Map a raw provider response into a [`ThreatRecord`].
///
/// Returns `None` when the payload lacks the minimum required fields for
/// its source; this is a recoverable "nothing to show", not an error.
pub fn normalize(source: Source, indicator: &str, raw: &Value) -> Option<ThreatRecord> {
    match source {
        Source::VirusTotal => normalize_virustotal(indicator, raw),
        Source::AbuseIpDb => normalize_abuseipdb(indicator, raw),
        Source::ThreatFox => normalize_threatfox(indicator, raw),
        Source::PulseDive => normalize_pulsedive(indicator, raw),
    }
}

/// Malicious-count thresholds: >5 high, 1-5 medium, 0 low
pub fn severity_from_malicious_count(count: i64) -> Severity {
    if count > 5 {
        Severity::High
    } else if count > 0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Confidence-percentage thresholds: >=90 high, 40-89 medium, <40 low
pub fn severity_from_confidence_pct(score: i64) -> Severity {
    if score >= 90 {
        Severity::High
    } else if score >= 40 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Confidence-level thresholds: >75 high, 26-75 medium, <=25 low
pub fn severity_from_confidence_level(level: i64) -> Severity {
    if level > 75 {
        Severity::High
    } else if level > 25 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Qualitative risk labels: critical and high collapse to high
pub fn severity_from_risk_label(risk: &str) -> Severity {
    match risk {
        "critical" | "high" => Severity::High,
        "medium" => Severity::Medium,
        _ => Severity::Low,
    }
}

fn str_or_na(value: Option<&Value>) -> Value {
    value
        .and_then(Value::as_str)
        .map(|s| json!(s))
        .unwrap_or_else(|| json!("N/A"))
}

fn record(
    indicator: String,
    source: Source,
    severity: Severity,
    attributes: Map<String, Value>,
    geo: Option<GeoPoint>,
) -> ThreatRecord {
    ThreatRecord {
        indicator,
        source,
        severity,
        attributes,
        geo,
        observed_at: Utc::now(),
        tags: Vec::new(),
    }
}

fn normalize_virustotal(indicator: &str, raw: &Value) -> Option<ThreatRecord> {
    let attrs = raw.get("data")?.get("attributes")?;
    let stats = attrs.get("last_analysis_stats");

    let malicious = stats
        .and_then(|s| s.get("malicious"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let suspicious = stats
        .and_then(|s| s.get("suspicious"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let mut attributes = Map::new();
    attributes.insert("owner".into(), str_or_na(attrs.get("as_owner")));
    attributes.insert("country".into(), str_or_na(attrs.get("country")));
    attributes.insert("malicious_score".into(), json!(malicious));
    attributes.insert("suspicious_score".into(), json!(suspicious));
    attributes.insert(
        "iocs".into(),
        attrs
            .get("last_analysis_results")
            .cloned()
            .unwrap_or_else(|| json!({})),
    );

    Some(record(
        indicator.to_string(),
        Source::VirusTotal,
        severity_from_malicious_count(malicious),
        attributes,
        None,
    ))
}

fn normalize_abuseipdb(indicator: &str, raw: &Value) -> Option<ThreatRecord> {
    let data = raw.get("data")?;

    let abuse_score = data
        .get("abuseConfidenceScore")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let mut attributes = Map::new();
    attributes.insert("country".into(), str_or_na(data.get("countryCode")));
    attributes.insert("isp".into(), str_or_na(data.get("isp")));
    attributes.insert("domain".into(), str_or_na(data.get("domain")));
    attributes.insert("abuse_score".into(), json!(abuse_score));
    attributes.insert(
        "iocs".into(),
        data.get("reports").cloned().unwrap_or_else(|| json!([])),
    );

    let geo = match (
        data.get("latitude").and_then(Value::as_f64),
        data.get("longitude").and_then(Value::as_f64),
    ) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint {
            latitude,
            longitude,
        }),
        _ => None,
    };

    let value = data
        .get("ipAddress")
        .and_then(Value::as_str)
        .unwrap_or(indicator);

    Some(record(
        value.to_string(),
        Source::AbuseIpDb,
        severity_from_confidence_pct(abuse_score),
        attributes,
        geo,
    ))
}

fn normalize_threatfox(indicator: &str, raw: &Value) -> Option<ThreatRecord> {
    let entry = raw.get("data")?.get(0)?;

    let confidence = entry
        .get("confidence_level")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let mut attributes = Map::new();
    attributes.insert("threat_type".into(), str_or_na(entry.get("threat_type")));
    attributes.insert("malware".into(), str_or_na(entry.get("malware_printable")));
    attributes.insert("confidence".into(), json!(confidence));
    attributes.insert("iocs".into(), json!([entry.clone()]));

    let value = entry.get("ioc").and_then(Value::as_str).unwrap_or(indicator);

    Some(record(
        value.to_string(),
        Source::ThreatFox,
        severity_from_confidence_level(confidence),
        attributes,
        None,
    ))
}

fn normalize_pulsedive(indicator: &str, raw: &Value) -> Option<ThreatRecord> {
    raw.get("indicator")?;

    let risk = raw.get("risk").and_then(Value::as_str).unwrap_or("low");

    let mut attributes = Map::new();
    attributes.insert("risk".into(), json!(risk));
    attributes.insert("type".into(), str_or_na(raw.get("type")));
    attributes.insert("seen".into(), str_or_na(raw.get("seen")));
    attributes.insert(
        "iocs".into(),
        raw.get("attributes").cloned().unwrap_or_else(|| json!({})),
    );

    let value = raw
        .get("indicator")
        .and_then(Value::as_str)
        .unwrap_or(indicator);

    Some(record(
        value.to_string(),
        Source::PulseDive,
        severity_from_risk_label(risk),
        attributes,
        None,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malicious_count_thresholds() {
        assert_eq!(severity_from_malicious_count(6), Severity::High);
        assert_eq!(severity_from_malicious_count(3), Severity::Medium);
        assert_eq!(severity_from_malicious_count(1), Severity::Medium);
        assert_eq!(severity_from_malicious_count(0), Severity::Low);
    }

    #[test]
    fn confidence_pct_thresholds() {
        assert_eq!(severity_from_confidence_pct(95), Severity::High);
        assert_eq!(severity_from_confidence_pct(90), Severity::High);
        assert_eq!(severity_from_confidence_pct(89), Severity::Medium);
        assert_eq!(severity_from_confidence_pct(50), Severity::Medium);
        assert_eq!(severity_from_confidence_pct(40), Severity::Medium);
        assert_eq!(severity_from_confidence_pct(10), Severity::Low);
    }

    #[test]
    fn confidence_level_thresholds() {
        assert_eq!(severity_from_confidence_level(76), Severity::High);
        assert_eq!(severity_from_confidence_level(75), Severity::Medium);
        assert_eq!(severity_from_confidence_level(26), Severity::Medium);
        assert_eq!(severity_from_confidence_level(25), Severity::Low);
    }

    #[test]
    fn risk_label_mapping() {
        assert_eq!(severity_from_risk_label("critical"), Severity::High);
        assert_eq!(severity_from_risk_label("high"), Severity::High);
        assert_eq!(severity_from_risk_label("medium"), Severity::Medium);
        assert_eq!(severity_from_risk_label("low"), Severity::Low);
        assert_eq!(severity_from_risk_label("unknown"), Severity::Low);
    }

    #[test]
    fn virustotal_missing_envelope_is_none() {
        assert!(normalize(Source::VirusTotal, "1.2.3.4", &json!({})).is_none());
        assert!(normalize(Source::VirusTotal, "1.2.3.4", &json!({"data": {}})).is_none());
    }

    #[test]
    fn virustotal_defaults_missing_fields() {
        let raw = json!({"data": {"attributes": {}}});
        let record = normalize(Source::VirusTotal, "1.2.3.4", &raw).unwrap();
        assert_eq!(record.severity, Severity::Low);
        assert_eq!(record.attributes["owner"], json!("N/A"));
        assert_eq!(record.attributes["country"], json!("N/A"));
        assert_eq!(record.attributes["malicious_score"], json!(0));
        assert!(record.geo.is_none());
    }

    #[test]
    fn virustotal_high_severity() {
        let raw = json!({
            "data": {"attributes": {
                "as_owner": "Bad Hosting Inc",
                "country": "RU",
                "last_analysis_stats": {"malicious": 12, "suspicious": 2},
            }}
        });
        let record = normalize(Source::VirusTotal, "1.2.3.4", &raw).unwrap();
        assert_eq!(record.severity, Severity::High);
        assert_eq!(record.attributes["owner"], json!("Bad Hosting Inc"));
        assert_eq!(record.attributes["suspicious_score"], json!(2));
    }

    #[test]
    fn abuseipdb_missing_data_is_none() {
        assert!(normalize(Source::AbuseIpDb, "8.8.8.8", &json!({"errors": []})).is_none());
    }

    #[test]
    fn abuseipdb_geo_and_severity() {
        let raw = json!({"data": {
            "ipAddress": "8.8.8.8",
            "abuseConfidenceScore": 95,
            "countryCode": "US",
            "isp": "Google LLC",
            "latitude": 37.40599,
            "longitude": -122.078514,
        }});
        let record = normalize(Source::AbuseIpDb, "8.8.8.8", &raw).unwrap();
        assert_eq!(record.indicator, "8.8.8.8");
        assert_eq!(record.severity, Severity::High);
        let geo = record.geo.unwrap();
        assert_eq!(geo.latitude, 37.40599);
        assert_eq!(record.attributes["domain"], json!("N/A"));
    }

    #[test]
    fn abuseipdb_without_geo() {
        let raw = json!({"data": {"ipAddress": "1.2.3.4", "abuseConfidenceScore": 10}});
        let record = normalize(Source::AbuseIpDb, "1.2.3.4", &raw).unwrap();
        assert!(record.geo.is_none());
        assert_eq!(record.severity, Severity::Low);
    }

    #[test]
    fn threatfox_takes_first_entry() {
        let raw = json!({"data": [
            {"ioc": "evil.example", "confidence_level": 80, "threat_type": "botnet_cc",
             "malware_printable": "Cobalt Strike"},
            {"ioc": "other.example", "confidence_level": 10},
        ]});
        let record = normalize(Source::ThreatFox, "evil.example", &raw).unwrap();
        assert_eq!(record.indicator, "evil.example");
        assert_eq!(record.severity, Severity::High);
        assert_eq!(record.attributes["malware"], json!("Cobalt Strike"));
    }

    #[test]
    fn threatfox_empty_data_is_none() {
        assert!(normalize(Source::ThreatFox, "x", &json!({"data": []})).is_none());
        assert!(normalize(Source::ThreatFox, "x", &json!({"query_status": "no_result"})).is_none());
    }

    #[test]
    fn pulsedive_requires_indicator_field() {
        assert!(normalize(Source::PulseDive, "x", &json!({"error": "not found"})).is_none());
    }

    #[test]
    fn pulsedive_risk_defaults_low() {
        let raw = json!({"indicator": "example.com"});
        let record = normalize(Source::PulseDive, "example.com", &raw).unwrap();
        assert_eq!(record.severity, Severity::Low);
        assert_eq!(record.attributes["risk"], json!("low"));
    }
}
