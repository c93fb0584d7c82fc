//! ThreatPulse
//!
//! A service for aggregating, enriching, and streaming threat
//! intelligence about indicators of compromise.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use threatpulse::api::{create_router, AppState};
use threatpulse::enrich::Enricher;
use threatpulse::feed::LiveFeed;
use threatpulse::providers::{
    abuseipdb::AbuseIpDbAdapter, pulsedive::PulseDiveAdapter, threatfox::ThreatFoxAdapter,
    virustotal::VirusTotalAdapter,
};
use threatpulse::sink::BroadcastSink;
use threatpulse::storage::cache::ResultCache;
use threatpulse::storage::ThreatRepo;

/// ThreatPulse
#[derive(Parser, Debug)]
#[command(name = "threatpulse")]
#[command(about = "Aggregate, enrich, and stream threat intelligence")]
struct Args {
    /// Server host
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Server port
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Threat record database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://threatpulse.db?mode=rwc")]
    database_url: String,

    /// Result cache database path
    #[arg(long, env = "CACHE_DB", default_value = "threat_cache.db")]
    cache_db: String,

    /// Cache entry lifetime in seconds
    #[arg(long, env = "CACHE_DURATION_SECS", default_value = "43200")]
    cache_duration_secs: i64,

    /// VirusTotal API key
    #[arg(long, env = "VIRUSTOTAL_API_KEY")]
    virustotal_api_key: Option<String>,

    /// AbuseIPDB API key
    #[arg(long, env = "ABUSEIPDB_API_KEY")]
    abuseipdb_api_key: Option<String>,

    /// ThreatFox API key
    #[arg(long, env = "THREATFOX_API_KEY")]
    threatfox_api_key: Option<String>,

    /// PulseDive API key
    #[arg(long, env = "PULSEDIVE_API_KEY")]
    pulsedive_api_key: Option<String>,

    /// Live feed poll interval in seconds
    #[arg(long, env = "FEED_INTERVAL_SECS", default_value = "30")]
    feed_interval_secs: u64,

    /// Cache pruning interval in seconds
    #[arg(long, env = "PRUNE_INTERVAL_SECS", default_value = "3600")]
    prune_interval_secs: u64,

    /// Disable the simulated live threat feed
    #[arg(long, default_value = "false")]
    no_live_feed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threatpulse=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse arguments
    let args = Args::parse();

    tracing::info!("Starting ThreatPulse");

    // Open the threat record repository
    let repo = ThreatRepo::new(&args.database_url)
        .await
        .context("Failed to open threat database")?;

    // Result cache; degrades to always-miss when the path is unusable
    let cache = ResultCache::new(&args.cache_db, args.cache_duration_secs);

    // Event channel behind the WebSocket stream
    let (events, _) = broadcast::channel(256);
    let sink = Arc::new(BroadcastSink::new(events.clone()));

    // Register provider adapters in priority order
    let mut enricher = Enricher::new(cache.clone(), repo.clone(), sink);

    if let Some(api_key) = args.virustotal_api_key {
        tracing::info!("VirusTotal lookups enabled");
        enricher.add_adapter(Arc::new(VirusTotalAdapter::new(api_key)));
    }

    if let Some(api_key) = args.abuseipdb_api_key {
        tracing::info!("AbuseIPDB lookups enabled");
        enricher.add_adapter(Arc::new(AbuseIpDbAdapter::new(api_key)));
    }

    if let Some(api_key) = args.threatfox_api_key {
        tracing::info!("ThreatFox lookups enabled");
        enricher.add_adapter(Arc::new(ThreatFoxAdapter::new(api_key)));
    }

    if let Some(api_key) = args.pulsedive_api_key {
        tracing::info!("PulseDive lookups enabled");
        enricher.add_adapter(Arc::new(PulseDiveAdapter::new(api_key)));
    }

    let enricher = Arc::new(enricher);

    // Background jobs: cache pruning sweep and the simulated live feed
    let scheduler = JobScheduler::new().await?;

    let prune_cache = cache.clone();
    scheduler
        .add(Job::new_repeated_async(
            Duration::from_secs(args.prune_interval_secs),
            move |_id, _sched| {
                let cache = prune_cache.clone();
                Box::pin(async move {
                    let cutoff = Utc::now() - chrono::Duration::seconds(cache.cache_duration_secs());
                    cache.prune(cutoff).await;
                })
            },
        )?)
        .await?;

    if !args.no_live_feed {
        let feed = Arc::new(LiveFeed::new(enricher.clone()));
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(args.feed_interval_secs),
                move |_id, _sched| {
                    let feed = feed.clone();
                    Box::pin(async move {
                        feed.tick().await;
                    })
                },
            )?)
            .await?;
    }

    scheduler.start().await?;

    // Create application state
    let state = Arc::new(AppState {
        repo,
        enricher,
        events,
    });

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
