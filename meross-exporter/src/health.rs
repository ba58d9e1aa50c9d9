use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::registry::CycleResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleReport {
    pub result: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub devices: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExporterHealth {
    pub status: String,
    pub uptime_seconds: u64,
    pub consecutive_failures: u32,
    pub devices_published: usize,
    pub last_cycle: Option<CycleReport>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    consecutive_failures: Arc<AtomicU32>,
    last_cycle: Arc<Mutex<Option<CycleReport>>>,
    devices_published: Arc<Mutex<usize>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            last_cycle: Arc::new(Mutex::new(None)),
            devices_published: Arc::new(Mutex::new(0)),
        }
    }

    pub fn record(&self, result: CycleResult, duration_ms: u64, devices: Option<usize>, error: Option<String>) {
        if result == CycleResult::Success {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            if let Some(count) = devices {
                *self.devices_published.lock() = count;
            }
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }

        *self.last_cycle.lock() = Some(CycleReport {
            result: result.as_str().to_string(),
            finished_at: chrono::Utc::now().to_rfc3339(),
            duration_ms,
            devices,
            error,
        });
    }

    pub fn get_health(&self) -> ExporterHealth {
        let last_cycle = self.last_cycle.lock().clone();
        let consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed);

        // "starting" until the first cycle ends, "degraded" while cycles keep failing
        let status = match (&last_cycle, consecutive_failures) {
            (None, _) => "starting",
            (Some(_), 0) => "ok",
            _ => "degraded",
        };

        ExporterHealth {
            status: status.to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            consecutive_failures,
            devices_published: *self.devices_published.lock(),
            last_cycle,
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
