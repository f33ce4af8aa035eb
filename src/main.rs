//! Gateway binary.
//!
//! Loads a TOML config, wires the admission pipeline, and serves the HTTP
//! API until the process exits.
//!
//! ## Environment Variables
//!
//! - `GATEWAY_CONFIG` — path to the config file (default: `gateway.toml`)
//! - `LOG_FORMAT=json` — structured JSON output (production)
//! - `RUST_LOG=info` — log level filter

use std::path::Path;
use std::sync::Arc;

use tokio_model_gateway::auth::KeyResolver;
use tokio_model_gateway::clock::SystemClock;
use tokio_model_gateway::config;
use tokio_model_gateway::directory::MemoryDirectory;
use tokio_model_gateway::dispatch::HttpBackend;
use tokio_model_gateway::limits::{BudgetGate, QuotaGate, RateLimiter, TracingAlertSink};
use tokio_model_gateway::metrics::init_metrics;
use tokio_model_gateway::routing::{
    ComplexityDetector, JaccardSimilarity, ModelScorer, SessionAffinity,
};
use tokio_model_gateway::usage::TracingUsageSink;
use tokio_model_gateway::web_api::start_server;
use tokio_model_gateway::{
    init_tracing, MemoryCounterStore, ModelRegistry, Selector, SelectorDeps,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = init_tracing();
    init_metrics()?;

    let config_path =
        std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.toml".to_string());
    let config = config::load_from_file(Path::new(&config_path))?;
    info!(
        path = %config_path,
        models = config.models.len(),
        plans = config.plans.len(),
        subscriptions = config.subscriptions.len(),
        "config loaded"
    );

    // Directory: keys, subscriptions, plans.
    let directory = Arc::new(MemoryDirectory::new());
    for key in config.api_key_records() {
        directory.upsert_key(key);
    }
    for sub in config.subscription_records() {
        directory.upsert_subscription(sub);
    }
    for plan in config.plan_records() {
        directory.upsert_plan(plan);
    }

    // Fleet.
    let registry = Arc::new(ModelRegistry::new());
    for profile in config.model_profiles() {
        registry.register(profile);
    }

    let store = Arc::new(MemoryCounterStore::new());
    let clock = Arc::new(SystemClock);

    let selector = Arc::new(Selector::new(SelectorDeps {
        resolver: Arc::new(KeyResolver::new(directory)),
        rate_limiter: Arc::new(RateLimiter::new()),
        quota: Arc::new(QuotaGate::new(store.clone(), clock.clone())),
        budget: Arc::new(BudgetGate::new(
            store,
            clock.clone(),
            Arc::new(TracingAlertSink),
        )),
        registry,
        affinity: Arc::new(SessionAffinity::new(Box::new(JaccardSimilarity))),
        scorer: ModelScorer::new(config.scoring.into()),
        detector: ComplexityDetector,
        backend: Arc::new(HttpBackend::default()),
        usage: Arc::new(TracingUsageSink),
        clock,
    }));

    start_server(config.server, selector).await
}
