//! Meross cloud client
//!
//! Two transports are involved:
//! - the signed HTTP API (`/v1/Auth/signIn`, `/v1/Device/devList`) for the
//!   account session and device discovery
//! - the cloud MQTT brokers, where device commands are published and answers
//!   come back on a per-client topic
//!
//! The exporter only talks to the cloud through [`DeviceCloud`], so the
//! fetcher can be exercised against a fake.

#[cfg(test)]
pub mod fake;
pub mod http;
pub mod meross;
pub mod mqtt;
pub mod protocol;

use async_trait::async_trait;
use std::fmt;

use crate::config::Credentials;

pub use meross::MerossCloud;

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cloud API returned status {status}: {info}")]
    Api { status: i64, info: String },
    #[error("authentication rejected: {0}")]
    AuthFailed(String),
    #[error("cloud session expired or invalid")]
    SessionExpired,
    #[error("unexpected payload: {0}")]
    Decode(String),
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("no answer from device {0} in time")]
    Timeout(String),
    #[error("device {uuid} answered with an error: {detail}")]
    DeviceError { uuid: String, detail: String },
}

impl From<serde_json::Error> for CloudError {
    fn from(e: serde_json::Error) -> Self {
        CloudError::Decode(e.to_string())
    }
}

impl From<rumqttc::ClientError> for CloudError {
    fn from(e: rumqttc::ClientError) -> Self {
        CloudError::Mqtt(e.to_string())
    }
}

/// Authenticated account session returned by sign-in
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub token: String,
    pub key: String,
    /// Regional HTTP API base URL for subsequent calls
    pub api_base_url: String,
    /// Default MQTT broker (`host[:port]`)
    pub mqtt_domain: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("api_base_url", &self.api_base_url)
            .field("mqtt_domain", &self.mqtt_domain)
            .finish_non_exhaustive()
    }
}

/// Device connectivity as reported by the cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineStatus {
    Unknown,
    NotOnline,
    Online,
    Offline,
    Upgrading,
}

impl OnlineStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => OnlineStatus::NotOnline,
            1 => OnlineStatus::Online,
            2 => OnlineStatus::Offline,
            3 => OnlineStatus::Upgrading,
            _ => OnlineStatus::Unknown,
        }
    }

    /// Short label used for the `network_status` metric label
    pub fn label(&self) -> &'static str {
        match self {
            OnlineStatus::Unknown => "UNKNOWN",
            OnlineStatus::NotOnline => "NOT_ONLINE",
            OnlineStatus::Online => "ONLINE",
            OnlineStatus::Offline => "OFFLINE",
            OnlineStatus::Upgrading => "UPGRADING",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, OnlineStatus::Online)
    }
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One device from the account's device list
#[derive(Debug, Clone, PartialEq)]
pub struct CloudDevice {
    pub uuid: String,
    pub name: String,
    /// Model identifier, e.g. `mss310`
    pub device_type: String,
    pub online_status: OnlineStatus,
    /// MQTT broker the device is attached to, when the cloud reports one
    pub domain: Option<String>,
}

/// Instantaneous electricity reading, in SI units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElectricityReading {
    pub watts: f64,
    pub volts: f64,
    pub amps: f64,
}

#[async_trait]
pub trait DeviceCloud: Send + Sync {
    /// Opens an account session with the email/password pair
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, CloudError>;

    /// Runs device discovery for the session's account
    async fn list_devices(&self, session: &Session) -> Result<Vec<CloudDevice>, CloudError>;

    /// Reads the instantaneous power metrics of one device
    async fn instant_electricity(
        &self,
        session: &Session,
        device: &CloudDevice,
    ) -> Result<ElectricityReading, CloudError>;
}
