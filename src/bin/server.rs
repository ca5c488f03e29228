//! Guardian HTTP server binary.
//!
//! Boot order: config, logging, store, node identity, metrics, workers,
//! then the listener. Failures before the listener is up are fatal: a
//! guardian that cannot reach its store or register its counters must not
//! answer a mail filter.
//!
//! # Configuration
//!
//! Options resolve config-file → environment → default. The file path comes
//! from the first CLI argument or `GUARDIAN_CONFIG`. SIGHUP reloads the
//! file without dropping in-flight requests.
//!
//! # Usage
//!
//! ```bash
//! guardian /etc/mailuminati/guardian.conf
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};

use guardian::analyzer::Analyzer;
use guardian::config::Config;
use guardian::images::ImageSidechannel;
use guardian::metrics::Metrics;
use guardian::oracle::OracleClient;
use guardian::reporter::Reporter;
use guardian::server::{app_router, AppState};
use guardian::store::index::Index;
use guardian::store::RedisStore;
use guardian::sync::{run_stats_worker, run_sync_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GUARDIAN_CONFIG").ok())
        .map(PathBuf::from);
    let config = Arc::new(Config::load(config_path).context("loading configuration")?);

    init_tracing(&config);

    let store = RedisStore::connect(&config.redis_url())
        .await
        .context("connecting to key/value store")?;
    let index = Index::new(Arc::new(store));

    let node_id = index
        .node_id()
        .await
        .context("reading or minting node id")?;
    let metrics = Arc::new(Metrics::new().context("registering metrics")?);
    let oracle = Arc::new(
        OracleClient::new(config.oracle_url(), node_id.clone())
            .context("building oracle client")?,
    );
    let images = ImageSidechannel::new(index.clone()).context("building image fetcher")?;

    let state = AppState {
        analyzer: Arc::new(Analyzer::new(
            index.clone(),
            oracle.clone(),
            images,
            metrics.clone(),
            config.clone(),
        )),
        reporter: Arc::new(Reporter::new(index.clone(), oracle.clone(), config.clone())),
        index: index.clone(),
        metrics: metrics.clone(),
        config: config.clone(),
    };

    tokio::spawn(run_sync_worker(index, oracle, config.clone()));
    tokio::spawn(run_stats_worker(metrics));
    tokio::spawn(reload_on_sighup(config.clone()));

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    tracing::info!(
        bind = %bind_addr,
        node_id = %node_id,
        oracle = %config.oracle_url(),
        image_analysis = config.image_analysis_enabled(),
        version = guardian::VERSION,
        "guardian listening"
    );

    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let level = config.log_level().to_lowercase();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if config.log_format_json() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Reload the config file on every SIGHUP.
async fn reload_on_sighup(config: Arc<Config>) {
    let Ok(mut hangup) = signal(SignalKind::hangup()) else {
        tracing::warn!("cannot install SIGHUP handler; hot reload disabled");
        return;
    };
    while hangup.recv().await.is_some() {
        match config.reload() {
            Ok(()) => tracing::info!("configuration reloaded"),
            Err(e) => tracing::warn!(error = %e, "configuration reload failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = ctrl_c.await;
            return;
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = term.recv() => {}
    }
    tracing::info!("shutting down");
}
