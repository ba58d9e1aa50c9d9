/**
 * MEROSS EXPORTER - Point d'entrée
 *
 * RÔLE : Charge la config (.env + variables d'environnement) et les métadonnées,
 * démarre l'endpoint Prometheus puis lance le poll loop du cloud Meross.
 *
 * ARCHITECTURE : un seul poller (pas de cycles concurrents) qui écrit dans le
 * registre partagé, un serveur Axum qui le lit.
 */

mod cloud;
mod config;
mod fetcher;
mod health;
mod http;
mod metadata;
mod poller;
mod registry;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cloud::meross::REQUEST_TIMEOUT;
use crate::cloud::MerossCloud;
use crate::config::ExporterConfig;
use crate::fetcher::TelemetryFetcher;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::metadata::MetadataStore;
use crate::poller::Poller;
use crate::registry::MetricRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("meross_exporter=info")),
        )
        .init();

    let config = ExporterConfig::from_env().context("invalid exporter configuration")?;
    info!("starting meross-exporter v{}", env!("CARGO_PKG_VERSION"));

    let metadata = MetadataStore::load(&config.metadata_path)
        .with_context(|| format!("cannot load device metadata from {}", config.metadata_path.display()))?;
    if metadata.is_empty() {
        warn!("no device described in {}, every device gets tag=none type=unknown", config.metadata_path.display());
    } else {
        info!("{} device(s) described in {}", metadata.len(), config.metadata_path.display());
    }

    let registry = Arc::new(MetricRegistry::new().context("cannot register metrics")?);
    let health = HealthTracker::new();

    // HTTP
    let addr = SocketAddr::from(([0, 0, 0, 0], config.exporter_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind exporter port {}", config.exporter_port))?;
    let app_state = AppState { registry: registry.clone(), health: health.clone() };
    let server = tokio::spawn(http::serve(listener, app_state));

    // poll loop
    let cloud = MerossCloud::new(&config.api_base_url, REQUEST_TIMEOUT)
        .context("cannot build Meross cloud client")?;
    let fetcher = TelemetryFetcher::new(cloud, config.credentials.clone(), &config.monitored_types);
    let poller = Poller::new(
        fetcher,
        registry,
        Arc::new(metadata),
        health,
        config.poll_interval,
        config.cycle_timeout,
    );

    tokio::select! {
        _ = poller.run() => {}
        res = server => {
            match res {
                Ok(Ok(())) => error!("HTTP server stopped"),
                Ok(Err(e)) => error!("HTTP server failed: {}", e),
                Err(e) => error!("HTTP server task panicked: {}", e),
            }
            anyhow::bail!("metrics endpoint is down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    Ok(())
}
