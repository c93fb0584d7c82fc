//! Enrichment orchestrator
//!
//! One run per indicator: sources are consulted sequentially in priority
//! order, cache first, and every normalized record is streamed to the
//! sink as soon as it is available. A failing source never blocks the
//! ones after it.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::models::{Indicator, ThreatRecord};
use crate::normalize::normalize;
use crate::providers::ProviderAdapter;
use crate::sink::{Event, EventSink};
use crate::storage::cache::ResultCache;
use crate::storage::ThreatRepo;

/// Orchestrates provider lookups for one indicator at a time
pub struct Enricher {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    cache: ResultCache,
    repo: ThreatRepo,
    sink: Arc<dyn EventSink>,
}

impl Enricher {
    pub fn new(cache: ResultCache, repo: ThreatRepo, sink: Arc<dyn EventSink>) -> Self {
        Self {
            adapters: Vec::new(),
            cache,
            repo,
            sink,
        }
    }

    /// Register an adapter; registration order is query priority order
    pub fn add_adapter(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.push(adapter);
    }

    /// Enrich one indicator, emitting results as they arrive
    pub async fn enrich(&self, indicator: &str) {
        self.enrich_with_cancel(indicator, &CancellationToken::new())
            .await;
    }

    /// Enrich with a cancellation gate: cancellation stops further
    /// sources from being started, never an in-flight call.
    pub async fn enrich_with_cancel(&self, indicator: &str, cancel: &CancellationToken) {
        let trimmed = indicator.trim();
        if trimmed.is_empty() {
            // Upstream validation gate: no indicator, no events
            return;
        }

        let indicator = Indicator::classify(trimmed);
        self.sink.emit(Event::status(format!(
            "Beginning analysis for {}...",
            indicator.value
        )));

        for adapter in &self.adapters {
            if cancel.is_cancelled() {
                tracing::info!(indicator = %indicator.value, "Enrichment cancelled");
                break;
            }

            self.sink
                .emit(Event::status(format!("Querying {}...", adapter.name())));

            if !adapter.supports(indicator.indicator_type) {
                tracing::debug!(
                    provider = adapter.name(),
                    indicator = %indicator.value,
                    indicator_type = %indicator.indicator_type,
                    "Indicator type not supported"
                );
                continue;
            }

            if let Some(cached) = self.cache.get(&indicator.value, adapter.source()).await {
                self.emit_record(cached);
                continue;
            }

            let raw = match adapter.lookup(&indicator).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    tracing::debug!(
                        provider = adapter.name(),
                        indicator = %indicator.value,
                        "No data returned"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        provider = adapter.name(),
                        indicator = %indicator.value,
                        error = %e,
                        "Lookup failed"
                    );
                    continue;
                }
            };

            let Some(record) = normalize(adapter.source(), &indicator.value, &raw) else {
                tracing::debug!(
                    provider = adapter.name(),
                    indicator = %indicator.value,
                    "Response lacked required fields"
                );
                continue;
            };

            self.cache.put(&indicator, &record).await;
            if let Err(e) = self.repo.save(&record).await {
                tracing::warn!(error = %e, indicator = %indicator.value, "Failed to persist record");
            }
            self.emit_record(record);
        }

        self.sink.emit(Event::status("Analysis complete."));
    }

    fn emit_record(&self, record: ThreatRecord) {
        let has_geo = record.geo.is_some();
        self.sink.emit(Event::NewThreatData {
            source: record.source.to_string(),
            data: record.clone(),
        });
        if has_geo {
            self.sink.emit(Event::NewGeoThreat(record));
        }
    }

    /// Tag entry point: mutate the stored record and notify subscribers.
    /// Tag content is not validated beyond both fields being present.
    pub async fn add_tag(&self, threat_id: &str, tag: &str) -> Result<bool> {
        let tagged = self.repo.add_tag(threat_id, tag).await?;
        if tagged {
            self.sink.emit(Event::TagAdded {
                threat_id: threat_id.to_string(),
                tag: tag.to_string(),
            });
        }
        Ok(tagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::models::{IndicatorType, Source};
    use crate::providers::AdapterError;
    use crate::sink::MemorySink;

    enum Behavior {
        Respond(Value),
        NotFound,
        Fail,
    }

    struct StubAdapter {
        source: Source,
        name: &'static str,
        ip_only: bool,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl StubAdapter {
        fn new(source: Source, name: &'static str, behavior: Behavior) -> Self {
            Self {
                source,
                name,
                ip_only: false,
                behavior,
                calls: AtomicUsize::new(0),
            }
        }

        fn ip_only(mut self) -> Self {
            self.ip_only = true;
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        fn source(&self) -> Source {
            self.source
        }

        fn supports(&self, indicator_type: IndicatorType) -> bool {
            !self.ip_only || matches!(indicator_type, IndicatorType::Ip)
        }

        async fn lookup(&self, _indicator: &Indicator) -> Result<Option<Value>, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Respond(value) => Ok(Some(value.clone())),
                Behavior::NotFound => Ok(None),
                Behavior::Fail => Err(AdapterError::Malformed("stub failure".into())),
            }
        }
    }

    struct Harness {
        enricher: Enricher,
        sink: Arc<MemorySink>,
        _dir: tempfile::TempDir,
    }

    async fn harness(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path().join("cache.db"), 3600);
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("threats.db").display()
        );
        let repo = ThreatRepo::new(&url).await.unwrap();
        let sink = Arc::new(MemorySink::new());

        let mut enricher = Enricher::new(cache, repo, sink.clone());
        for adapter in adapters {
            enricher.add_adapter(adapter);
        }

        Harness {
            enricher,
            sink,
            _dir: dir,
        }
    }

    fn abuse_payload(score: i64) -> Value {
        json!({"data": {
            "ipAddress": "8.8.8.8",
            "abuseConfidenceScore": score,
            "countryCode": "US",
            "latitude": 37.4,
            "longitude": -122.0,
        }})
    }

    fn threat_data_events(events: &[Event]) -> Vec<&Event> {
        events
            .iter()
            .filter(|e| matches!(e, Event::NewThreatData { .. }))
            .collect()
    }

    #[tokio::test]
    async fn all_sources_failing_still_emits_start_and_completion() {
        let a = Arc::new(StubAdapter::new(Source::VirusTotal, "VirusTotal", Behavior::Fail));
        let b = Arc::new(StubAdapter::new(Source::ThreatFox, "ThreatFox", Behavior::Fail));
        let h = harness(vec![a, b]).await;

        h.enricher.enrich("8.8.8.8").await;

        let events = h.sink.events();
        assert!(threat_data_events(&events).is_empty());
        // start + 2 per-source statuses + completion
        assert_eq!(events.len(), 4);
        assert!(matches!(events.first(), Some(Event::StatusUpdate { message }) if message.contains("8.8.8.8")));
        assert!(matches!(events.last(), Some(Event::StatusUpdate { message }) if message == "Analysis complete."));
    }

    #[tokio::test]
    async fn one_failure_does_not_block_later_sources() {
        let failing = Arc::new(StubAdapter::new(Source::VirusTotal, "VirusTotal", Behavior::Fail));
        let healthy = Arc::new(StubAdapter::new(
            Source::AbuseIpDb,
            "AbuseIPDB",
            Behavior::Respond(abuse_payload(50)),
        ));
        let h = harness(vec![failing, healthy.clone()]).await;

        h.enricher.enrich("8.8.8.8").await;

        let events = h.sink.events();
        let data = threat_data_events(&events);
        assert_eq!(data.len(), 1);
        assert!(matches!(data[0], Event::NewThreatData { source, .. } if source == "AbuseIPDB"));
        assert!(matches!(events.last(), Some(Event::StatusUpdate { message }) if message == "Analysis complete."));
    }

    #[tokio::test]
    async fn empty_indicator_is_a_silent_noop() {
        let adapter = Arc::new(StubAdapter::new(
            Source::AbuseIpDb,
            "AbuseIPDB",
            Behavior::Respond(abuse_payload(50)),
        ));
        let h = harness(vec![adapter.clone()]).await;

        h.enricher.enrich("").await;
        h.enricher.enrich("   ").await;

        assert!(h.sink.events().is_empty());
        assert_eq!(adapter.call_count(), 0);
    }

    #[tokio::test]
    async fn geo_records_emit_both_events() {
        let adapter = Arc::new(StubAdapter::new(
            Source::AbuseIpDb,
            "AbuseIPDB",
            Behavior::Respond(abuse_payload(95)),
        ));
        let h = harness(vec![adapter]).await;

        h.enricher.enrich("8.8.8.8").await;

        let events = h.sink.events();
        let geo: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, Event::NewGeoThreat(_)))
            .collect();
        assert_eq!(threat_data_events(&events).len(), 1);
        assert_eq!(geo.len(), 1);
        match geo[0] {
            Event::NewGeoThreat(record) => {
                assert_eq!(record.severity, crate::models::Severity::High)
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn records_without_geo_emit_only_threat_data() {
        let adapter = Arc::new(StubAdapter::new(
            Source::ThreatFox,
            "ThreatFox",
            Behavior::Respond(json!({"data": [{"ioc": "evil.example", "confidence_level": 50}]})),
        ));
        let h = harness(vec![adapter]).await;

        h.enricher.enrich("evil.example").await;

        let events = h.sink.events();
        assert_eq!(threat_data_events(&events).len(), 1);
        assert!(!events.iter().any(|e| matches!(e, Event::NewGeoThreat(_))));
    }

    #[tokio::test]
    async fn ip_only_adapter_is_skipped_for_domains() {
        let adapter = Arc::new(
            StubAdapter::new(
                Source::AbuseIpDb,
                "AbuseIPDB",
                Behavior::Respond(abuse_payload(95)),
            )
            .ip_only(),
        );
        let h = harness(vec![adapter.clone()]).await;

        h.enricher.enrich("example.com").await;

        assert_eq!(adapter.call_count(), 0);
        let events = h.sink.events();
        assert!(threat_data_events(&events).is_empty());
        // the per-source status is still announced
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::StatusUpdate { message } if message == "Querying AbuseIPDB...")));
    }

    #[tokio::test]
    async fn second_lookup_hits_the_cache() {
        let adapter = Arc::new(StubAdapter::new(
            Source::AbuseIpDb,
            "AbuseIPDB",
            Behavior::Respond(abuse_payload(95)),
        ));
        let h = harness(vec![adapter.clone()]).await;

        h.enricher.enrich("8.8.8.8").await;
        h.enricher.enrich("8.8.8.8").await;

        assert_eq!(adapter.call_count(), 1);
        let events = h.sink.events();
        // both runs emitted the record, the second from cache
        assert_eq!(threat_data_events(&events).len(), 2);
    }

    #[tokio::test]
    async fn null_normalization_contributes_nothing() {
        let adapter = Arc::new(StubAdapter::new(
            Source::AbuseIpDb,
            "AbuseIPDB",
            Behavior::Respond(json!({"errors": ["rate limited"]})),
        ));
        let h = harness(vec![adapter.clone()]).await;

        h.enricher.enrich("8.8.8.8").await;

        assert_eq!(adapter.call_count(), 1);
        assert!(threat_data_events(&h.sink.events()).is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_remaining_sources() {
        let first = Arc::new(StubAdapter::new(
            Source::VirusTotal,
            "VirusTotal",
            Behavior::NotFound,
        ));
        let second = Arc::new(StubAdapter::new(
            Source::AbuseIpDb,
            "AbuseIPDB",
            Behavior::Respond(abuse_payload(95)),
        ));
        let h = harness(vec![first, second.clone()]).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        h.enricher.enrich_with_cancel("8.8.8.8", &cancel).await;

        assert_eq!(second.call_count(), 0);
        let events = h.sink.events();
        // start and completion still bracket the (empty) run
        assert!(matches!(events.last(), Some(Event::StatusUpdate { message }) if message == "Analysis complete."));
    }

    #[tokio::test]
    async fn add_tag_emits_event_for_known_record() {
        let adapter = Arc::new(StubAdapter::new(
            Source::AbuseIpDb,
            "AbuseIPDB",
            Behavior::Respond(abuse_payload(95)),
        ));
        let h = harness(vec![adapter]).await;

        h.enricher.enrich("8.8.8.8").await;
        let stored = h.enricher.repo.recent(1).await.unwrap();
        let id = stored[0].id.clone();

        assert!(h.enricher.add_tag(&id, "botnet").await.unwrap());
        assert!(!h.enricher.add_tag("missing", "botnet").await.unwrap());

        let tag_events: Vec<_> = h
            .sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::TagAdded { .. }))
            .collect();
        assert_eq!(tag_events.len(), 1);
    }
}
