//! Simulated live threat feed
//!
//! Not a separate code path: every poll picks an indicator from a fixed
//! known-threat list and runs it through the same enrichment entry point
//! as an interactive lookup.

use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::enrich::Enricher;

/// Known malicious IPs used to simulate a live feed
pub const KNOWN_THREAT_IPS: &[&str] = &[
    "185.220.101.4",
    "91.219.29.55",
    "198.54.117.199",
    "172.67.139.117",
    "104.21.23.149",
    "195.133.40.25",
];

/// Periodic producer feeding the orchestrator
pub struct LiveFeed {
    enricher: Arc<Enricher>,
}

impl LiveFeed {
    pub fn new(enricher: Arc<Enricher>) -> Self {
        Self { enricher }
    }

    /// Run one poll cycle
    pub async fn tick(&self) {
        let indicator = {
            let mut rng = rand::thread_rng();
            *KNOWN_THREAT_IPS
                .choose(&mut rng)
                .expect("known threat list is non-empty")
        };

        tracing::info!(indicator, "Live feed polling for new threats");
        self.enricher.enrich(indicator).await;
    }
}
