//! Prometheus metric registry
//!
//! Device gauges (label sets are never removed, values are last-write-wins):
//! - `module_device_info{device,name,tag,network_status,type,source}` = 1
//! - `module_power_status{device,name,tag,type}` = 1 when drawing power, else 0
//! - `module_power_consumption{device,name,tag,type}` = instantaneous watts
//!
//! Plus a few `meross_exporter_*` series describing the poll loop itself.

use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::time::Duration;

use crate::fetcher::DeviceSnapshot;
use crate::metadata::MetadataStore;

pub const SOURCE_LABEL: &str = "Meross";

/// Result of one poll cycle, as counted in `meross_exporter_cycles_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    Success,
    Failure,
    Timeout,
}

impl CycleResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleResult::Success => "success",
            CycleResult::Failure => "failure",
            CycleResult::Timeout => "timeout",
        }
    }
}

pub struct MetricRegistry {
    registry: Registry,
    device_info: GaugeVec,
    power_status: GaugeVec,
    power_consumption: GaugeVec,
    cycles_total: IntCounterVec,
    devices: IntGauge,
    last_success_timestamp: Gauge,
    cycle_duration: Gauge,
}

impl MetricRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let device_info = GaugeVec::new(
            Opts::new("module_device_info", "Module informations status"),
            &["device", "name", "tag", "network_status", "type", "source"],
        )?;
        let power_status = GaugeVec::new(
            Opts::new("module_power_status", "Module turned on or off"),
            &["device", "name", "tag", "type"],
        )?;
        let power_consumption = GaugeVec::new(
            Opts::new("module_power_consumption", "Power consumption of module in watts"),
            &["device", "name", "tag", "type"],
        )?;

        let cycles_total = IntCounterVec::new(
            Opts::new("meross_exporter_cycles_total", "Poll cycles by result"),
            &["result"],
        )?;
        let devices = IntGauge::new(
            "meross_exporter_devices",
            "Devices published by the last successful cycle",
        )?;
        let last_success_timestamp = Gauge::new(
            "meross_exporter_last_success_timestamp_seconds",
            "Unix time of the last successful cycle",
        )?;
        let cycle_duration = Gauge::new(
            "meross_exporter_cycle_duration_seconds",
            "Duration of the last poll cycle",
        )?;

        registry.register(Box::new(device_info.clone()))?;
        registry.register(Box::new(power_status.clone()))?;
        registry.register(Box::new(power_consumption.clone()))?;
        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(devices.clone()))?;
        registry.register(Box::new(last_success_timestamp.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;

        Ok(Self {
            registry,
            device_info,
            power_status,
            power_consumption,
            cycles_total,
            devices,
            last_success_timestamp,
            cycle_duration,
        })
    }

    /// Publishes one device snapshot
    pub fn update(&self, snapshot: &DeviceSnapshot, metadata: &MetadataStore) {
        let labels = metadata.resolve(&snapshot.name);
        let device = snapshot.uuid.as_str();
        let name = snapshot.name.as_str();
        let tag = labels.tag.as_str();
        let device_type = labels.device_type.as_str();

        self.device_info
            .with_label_values(&[
                device,
                name,
                tag,
                snapshot.online_status.label(),
                device_type,
                SOURCE_LABEL,
            ])
            .set(1.0);

        let (status, watts) = if snapshot.is_powered() {
            (1.0, snapshot.instant_watts)
        } else {
            (0.0, 0.0)
        };

        self.power_status
            .with_label_values(&[device, name, tag, device_type])
            .set(status);
        self.power_consumption
            .with_label_values(&[device, name, tag, device_type])
            .set(watts);
    }

    /// Counts a finished cycle
    pub fn record_cycle(&self, result: CycleResult, duration: Duration, devices: Option<usize>) {
        self.cycles_total.with_label_values(&[result.as_str()]).inc();
        self.cycle_duration.set(duration.as_secs_f64());
        if result == CycleResult::Success {
            self.last_success_timestamp
                .set(chrono::Utc::now().timestamp_millis() as f64 / 1000.0);
            if let Some(count) = devices {
                self.devices.set(count as i64);
            }
        }
    }

    /// Text exposition of every registered series
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}
