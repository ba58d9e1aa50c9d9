//! In-memory [`DeviceCloud`] for fetcher and poller tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{CloudDevice, CloudError, DeviceCloud, ElectricityReading, OnlineStatus, Session};
use crate::config::Credentials;

#[derive(Default)]
struct FakeState {
    devices: Vec<CloudDevice>,
    watts: HashMap<String, f64>,
    fail_sign_in: bool,
    fail_discovery: bool,
    fail_power_for: Option<String>,
    expire_next_discovery: bool,
    power_delay: Option<Duration>,
    sign_ins: usize,
    power_queries: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, uuid: &str, name: &str, device_type: &str, status: OnlineStatus, watts: f64) {
        let mut state = self.state.lock();
        state.devices.push(CloudDevice {
            uuid: uuid.into(),
            name: name.into(),
            device_type: device_type.into(),
            online_status: status,
            domain: None,
        });
        state.watts.insert(uuid.into(), watts);
    }

    pub fn set_watts(&self, uuid: &str, watts: f64) {
        self.state.lock().watts.insert(uuid.into(), watts);
    }

    pub fn fail_sign_in(&self, fail: bool) {
        self.state.lock().fail_sign_in = fail;
    }

    pub fn fail_discovery(&self, fail: bool) {
        self.state.lock().fail_discovery = fail;
    }

    pub fn fail_power_for(&self, uuid: Option<&str>) {
        self.state.lock().fail_power_for = uuid.map(str::to_string);
    }

    pub fn expire_next_discovery(&self) {
        self.state.lock().expire_next_discovery = true;
    }

    pub fn delay_power(&self, delay: Duration) {
        self.state.lock().power_delay = Some(delay);
    }

    pub fn sign_in_count(&self) -> usize {
        self.state.lock().sign_ins
    }

    pub fn power_queries(&self) -> Vec<String> {
        self.state.lock().power_queries.clone()
    }
}

#[async_trait]
impl DeviceCloud for FakeCloud {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, CloudError> {
        let mut state = self.state.lock();
        if state.fail_sign_in {
            return Err(CloudError::AuthFailed("Wrong password (1004)".into()));
        }
        state.sign_ins += 1;
        Ok(Session {
            user_id: "42".into(),
            email: credentials.email.clone(),
            token: format!("token-{}", state.sign_ins),
            key: "key".into(),
            api_base_url: "https://fake.meross".into(),
            mqtt_domain: "mqtt.fake.meross".into(),
        })
    }

    async fn list_devices(&self, _session: &Session) -> Result<Vec<CloudDevice>, CloudError> {
        let mut state = self.state.lock();
        if state.expire_next_discovery {
            state.expire_next_discovery = false;
            return Err(CloudError::SessionExpired);
        }
        if state.fail_discovery {
            return Err(CloudError::Api { status: 5000, info: "discovery unavailable".into() });
        }
        Ok(state.devices.clone())
    }

    async fn instant_electricity(
        &self,
        _session: &Session,
        device: &CloudDevice,
    ) -> Result<ElectricityReading, CloudError> {
        let delay = {
            let mut state = self.state.lock();
            state.power_queries.push(device.uuid.clone());
            if state.fail_power_for.as_deref() == Some(device.uuid.as_str()) {
                return Err(CloudError::Timeout(device.uuid.clone()));
            }
            state.power_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let watts = self.state.lock().watts.get(&device.uuid).copied().unwrap_or(0.0);
        Ok(ElectricityReading { watts, volts: 230.0, amps: watts / 230.0 })
    }
}
