use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::http::MerossHttpClient;
use super::mqtt::MqttChannel;
use super::protocol::{self, BrokerEndpoint};
use super::{CloudDevice, CloudError, DeviceCloud, ElectricityReading, Session};
use crate::config::Credentials;

/// Per-request bound for HTTP calls and device answers
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`DeviceCloud`] backed by the real Meross cloud
pub struct MerossCloud {
    http: MerossHttpClient,
    /// one channel per (account, broker)
    channels: Mutex<HashMap<String, Arc<MqttChannel>>>,
    request_timeout: Duration,
}

impl MerossCloud {
    pub fn new(api_base_url: &str, request_timeout: Duration) -> Result<Self, CloudError> {
        Ok(Self {
            http: MerossHttpClient::new(api_base_url, request_timeout)?,
            channels: Mutex::new(HashMap::new()),
            request_timeout,
        })
    }

    fn broker_for(session: &Session, device: &CloudDevice) -> Result<BrokerEndpoint, CloudError> {
        let domain = device.domain.as_deref().unwrap_or(&session.mqtt_domain);
        BrokerEndpoint::parse(domain)
    }

    fn channel_for(&self, session: &Session, endpoint: BrokerEndpoint) -> Arc<MqttChannel> {
        let key = format!("{}@{}", session.user_id, endpoint);
        let mut channels = self.channels.lock();
        channels
            .entry(key)
            .or_insert_with(|| Arc::new(MqttChannel::connect(endpoint, session, self.request_timeout)))
            .clone()
    }
}

#[async_trait]
impl DeviceCloud for MerossCloud {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, CloudError> {
        let session = self.http.sign_in(credentials).await?;
        // channels authenticated with the previous key are useless now
        let dropped = std::mem::take(&mut *self.channels.lock());
        if !dropped.is_empty() {
            debug!("closing {} MQTT channel(s) from the previous session", dropped.len());
        }
        info!("signed in to Meross cloud as {} ({})", session.email, session.api_base_url);
        Ok(session)
    }

    async fn list_devices(&self, session: &Session) -> Result<Vec<CloudDevice>, CloudError> {
        self.http.list_devices(session).await
    }

    async fn instant_electricity(
        &self,
        session: &Session,
        device: &CloudDevice,
    ) -> Result<ElectricityReading, CloudError> {
        let endpoint = Self::broker_for(session, device)?;
        let channel = self.channel_for(session, endpoint);
        let answer = channel
            .request(
                &device.uuid,
                "GET",
                protocol::ELECTRICITY_NAMESPACE,
                protocol::electricity_request(),
            )
            .await?;
        let reading = protocol::parse_electricity(&answer.payload)?;
        debug!(
            "{} ({}): {:.1} W, {:.1} V, {:.3} A",
            device.name, device.uuid, reading.watts, reading.volts, reading.amps
        );
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::OnlineStatus;
    use meross_devkit::{CloudStub, StubAccount};

    fn session(mqtt_domain: &str) -> Session {
        Session {
            user_id: "42".into(),
            email: "me@example.com".into(),
            token: "t".into(),
            key: "k".into(),
            api_base_url: "https://iotx-eu.meross.com".into(),
            mqtt_domain: mqtt_domain.into(),
        }
    }

    fn device(domain: Option<&str>) -> CloudDevice {
        CloudDevice {
            uuid: "uuid-1".into(),
            name: "Plug1".into(),
            device_type: "mss310".into(),
            online_status: OnlineStatus::Online,
            domain: domain.map(str::to_string),
        }
    }

    #[test]
    fn test_device_domain_wins_over_session_domain() {
        let endpoint = MerossCloud::broker_for(&session("mqtt-eu.meross.com"), &device(Some("mqtt-eu-3.meross.com:2001")))
            .unwrap();
        assert_eq!(endpoint, BrokerEndpoint { host: "mqtt-eu-3.meross.com".into(), port: 2001 });

        let endpoint = MerossCloud::broker_for(&session("mqtt-eu.meross.com"), &device(None)).unwrap();
        assert_eq!(endpoint, BrokerEndpoint { host: "mqtt-eu.meross.com".into(), port: 443 });
    }

    #[test]
    fn test_no_broker_known_is_an_error() {
        assert!(MerossCloud::broker_for(&session(""), &device(None)).is_err());
    }

    #[tokio::test]
    async fn test_new_session_drops_previous_channels() {
        meross_devkit::init_test_logging();
        let stub = CloudStub::start(StubAccount::new("me@example.com", "hunter2")).await.unwrap();
        let cloud = MerossCloud::new(&stub.base_url(), Duration::from_millis(100)).unwrap();
        let credentials = Credentials { email: "me@example.com".into(), password: "hunter2".into() };

        let session = cloud.sign_in(&credentials).await.unwrap();
        // nothing listens there, the device never answers
        let plug = device(Some("127.0.0.1:1"));
        let err = cloud.instant_electricity(&session, &plug).await.unwrap_err();
        assert!(matches!(err, CloudError::Timeout(_)));
        assert_eq!(cloud.channels.lock().len(), 1);

        // same session and broker: the channel is reused
        cloud.instant_electricity(&session, &plug).await.unwrap_err();
        assert_eq!(cloud.channels.lock().len(), 1);

        cloud.sign_in(&credentials).await.unwrap();
        assert!(cloud.channels.lock().is_empty());
    }
}
