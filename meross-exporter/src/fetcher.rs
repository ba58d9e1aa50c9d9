//! Telemetry fetcher: one full pass over the account's monitored plugs.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::cloud::{CloudDevice, CloudError, DeviceCloud, OnlineStatus, Session};
use crate::config::Credentials;

/// Point-in-time view of one monitored device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub uuid: String,
    pub name: String,
    pub online_status: OnlineStatus,
    pub instant_watts: f64,
}

impl DeviceSnapshot {
    pub fn is_powered(&self) -> bool {
        self.instant_watts > 0.0
    }
}

pub struct TelemetryFetcher<C> {
    cloud: C,
    credentials: Credentials,
    allow_list: HashSet<String>,
    session: Option<Session>,
}

impl<C: DeviceCloud> TelemetryFetcher<C> {
    pub fn new(cloud: C, credentials: Credentials, monitored_types: &[String]) -> Self {
        Self {
            cloud,
            credentials,
            allow_list: monitored_types.iter().cloned().collect(),
            session: None,
        }
    }

    pub fn is_monitored(&self, device: &CloudDevice) -> bool {
        self.allow_list.contains(&device.device_type)
    }

    /// Fetches a snapshot for every monitored device.
    ///
    /// All or nothing: the first failing call aborts the pass and no snapshot
    /// is returned.
    pub async fn fetch_all(&mut self) -> Result<Vec<DeviceSnapshot>, CloudError> {
        let mut session = self.session().await?;

        let devices = match self.cloud.list_devices(&session).await {
            Err(CloudError::SessionExpired) => {
                info!("cloud session expired, signing in again");
                self.session = None;
                session = self.session().await?;
                self.cloud.list_devices(&session).await?
            }
            other => other?,
        };

        let total = devices.len();
        let mut snapshots = Vec::new();
        for device in devices.into_iter().filter(|d| self.is_monitored(d)) {
            let instant_watts = if device.online_status.is_online() {
                self.cloud.instant_electricity(&session, &device).await?.watts
            } else {
                debug!("{} ({}) is {}, not queried", device.name, device.uuid, device.online_status);
                0.0
            };

            snapshots.push(DeviceSnapshot {
                uuid: device.uuid,
                name: device.name,
                online_status: device.online_status,
                instant_watts,
            });
        }

        debug!("{} device(s) discovered, {} monitored", total, snapshots.len());
        Ok(snapshots)
    }

    async fn session(&mut self) -> Result<Session, CloudError> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        let session = self.cloud.sign_in(&self.credentials).await?;
        self.session = Some(session.clone());
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::fake::FakeCloud;

    fn fetcher(cloud: &FakeCloud) -> TelemetryFetcher<FakeCloud> {
        TelemetryFetcher::new(
            cloud.clone(),
            Credentials { email: "me@example.com".into(), password: "hunter2".into() },
            &["mss310".to_string()],
        )
    }

    #[tokio::test]
    async fn test_only_allow_listed_types_are_fetched() {
        let cloud = FakeCloud::new();
        cloud.add_device("uuid-1", "Plug1", "mss310", OnlineStatus::Online, 3.2);
        cloud.add_device("uuid-2", "Bulb", "msl120", OnlineStatus::Online, 9.0);
        let mut fetcher = fetcher(&cloud);

        let snapshots = fetcher.fetch_all().await.unwrap();

        assert_eq!(
            snapshots,
            vec![DeviceSnapshot {
                uuid: "uuid-1".into(),
                name: "Plug1".into(),
                online_status: OnlineStatus::Online,
                instant_watts: 3.2,
            }]
        );
        assert_eq!(cloud.power_queries(), vec!["uuid-1".to_string()]);
    }

    #[tokio::test]
    async fn test_offline_devices_report_zero_without_query() {
        let cloud = FakeCloud::new();
        cloud.add_device("uuid-1", "Plug1", "mss310", OnlineStatus::Offline, 12.0);
        let mut fetcher = fetcher(&cloud);

        let snapshots = fetcher.fetch_all().await.unwrap();

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].instant_watts, 0.0);
        assert_eq!(snapshots[0].online_status.label(), "OFFLINE");
        assert!(!snapshots[0].is_powered());
        assert!(cloud.power_queries().is_empty());
    }

    #[tokio::test]
    async fn test_session_is_reused_across_passes() {
        let cloud = FakeCloud::new();
        cloud.add_device("uuid-1", "Plug1", "mss310", OnlineStatus::Online, 1.0);
        let mut fetcher = fetcher(&cloud);

        fetcher.fetch_all().await.unwrap();
        fetcher.fetch_all().await.unwrap();

        assert_eq!(cloud.sign_in_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_signs_in_again_once() {
        let cloud = FakeCloud::new();
        cloud.add_device("uuid-1", "Plug1", "mss310", OnlineStatus::Online, 1.0);
        let mut fetcher = fetcher(&cloud);

        fetcher.fetch_all().await.unwrap();
        cloud.expire_next_discovery();
        let snapshots = fetcher.fetch_all().await.unwrap();

        assert_eq!(snapshots.len(), 1);
        assert_eq!(cloud.sign_in_count(), 2);
    }

    #[tokio::test]
    async fn test_any_failure_aborts_the_pass() {
        let cloud = FakeCloud::new();
        cloud.add_device("uuid-1", "Plug1", "mss310", OnlineStatus::Online, 1.0);
        cloud.add_device("uuid-2", "Plug2", "mss310", OnlineStatus::Online, 2.0);
        let mut fetcher = fetcher(&cloud);

        cloud.fail_power_for(Some("uuid-2"));
        assert!(matches!(fetcher.fetch_all().await, Err(CloudError::Timeout(_))));

        cloud.fail_power_for(None);
        cloud.fail_discovery(true);
        assert!(matches!(fetcher.fetch_all().await, Err(CloudError::Api { .. })));
    }

    #[tokio::test]
    async fn test_sign_in_failure_is_reported() {
        let cloud = FakeCloud::new();
        cloud.fail_sign_in(true);
        let mut fetcher = fetcher(&cloud);

        assert!(matches!(fetcher.fetch_all().await, Err(CloudError::AuthFailed(_))));
        assert_eq!(cloud.sign_in_count(), 0);
    }
}
