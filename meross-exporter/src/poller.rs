//! Poll loop: fetch, publish, sleep, forever.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::cloud::DeviceCloud;
use crate::fetcher::TelemetryFetcher;
use crate::health::HealthTracker;
use crate::metadata::MetadataStore;
use crate::registry::{CycleResult, MetricRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Success { devices: usize },
    Failed(String),
    TimedOut,
}

pub struct Poller<C> {
    fetcher: TelemetryFetcher<C>,
    registry: Arc<MetricRegistry>,
    metadata: Arc<MetadataStore>,
    health: HealthTracker,
    interval: Duration,
    cycle_timeout: Duration,
}

impl<C: DeviceCloud> Poller<C> {
    pub fn new(
        fetcher: TelemetryFetcher<C>,
        registry: Arc<MetricRegistry>,
        metadata: Arc<MetadataStore>,
        health: HealthTracker,
        interval: Duration,
        cycle_timeout: Duration,
    ) -> Self {
        Self { fetcher, registry, metadata, health, interval, cycle_timeout }
    }

    /// One fetch + publish pass. Gauges are only touched when the whole
    /// fetch succeeded within the cycle timeout.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let started = Instant::now();

        let outcome = match timeout(self.cycle_timeout, self.fetcher.fetch_all()).await {
            Ok(Ok(snapshots)) => {
                for snapshot in &snapshots {
                    self.registry.update(snapshot, &self.metadata);
                }
                CycleOutcome::Success { devices: snapshots.len() }
            }
            Ok(Err(e)) => CycleOutcome::Failed(e.to_string()),
            Err(_) => CycleOutcome::TimedOut,
        };

        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        match &outcome {
            CycleOutcome::Success { devices } => {
                info!("cycle done: {} device(s) published in {} ms", devices, elapsed_ms);
                self.registry.record_cycle(CycleResult::Success, elapsed, Some(*devices));
                self.health.record(CycleResult::Success, elapsed_ms, Some(*devices), None);
            }
            CycleOutcome::Failed(reason) => {
                error!("cycle failed, keeping previous values: {}", reason);
                self.registry.record_cycle(CycleResult::Failure, elapsed, None);
                self.health.record(CycleResult::Failure, elapsed_ms, None, Some(reason.clone()));
            }
            CycleOutcome::TimedOut => {
                warn!("cycle timed out after {:?}, keeping previous values", self.cycle_timeout);
                self.registry.record_cycle(CycleResult::Timeout, elapsed, None);
                self.health.record(CycleResult::Timeout, elapsed_ms, None, None);
            }
        }

        outcome
    }

    /// Runs cycles until the process is stopped
    pub async fn run(mut self) {
        info!(
            "polling every {:?} (cycle timeout {:?})",
            self.interval, self.cycle_timeout
        );
        loop {
            self.run_cycle().await;
            sleep(self.interval).await;
        }
    }
}
