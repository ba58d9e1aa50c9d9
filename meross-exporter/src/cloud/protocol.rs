//! Wire formats and signatures of the Meross cloud.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CloudError, ElectricityReading};

/// Shared secret the official apps use to sign HTTP requests
pub const CLOUD_SECRET: &str = "23x17ahWarFH6w29";

pub const SIGN_IN_PATH: &str = "/v1/Auth/signIn";
pub const DEVICE_LIST_PATH: &str = "/v1/Device/devList";

pub const ELECTRICITY_NAMESPACE: &str = "Appliance.Control.Electricity";

pub const DEFAULT_MQTT_PORT: u16 = 443;

pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// 16 random uppercase alphanumerics
pub fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

/// Form body of every signed HTTP call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedForm {
    pub params: String,
    pub sign: String,
    pub timestamp: i64,
    pub nonce: String,
}

impl SignedForm {
    pub fn new(params: &Value, timestamp_ms: i64, nonce: String) -> Result<Self, CloudError> {
        let params = BASE64.encode(serde_json::to_string(params)?);
        let sign = md5_hex(&format!("{CLOUD_SECRET}{timestamp_ms}{nonce}{params}"));
        Ok(Self { params, sign, timestamp: timestamp_ms, nonce })
    }

    pub fn now(params: &Value) -> Result<Self, CloudError> {
        Self::new(params, chrono::Utc::now().timestamp_millis(), nonce())
    }
}

/// `{apiStatus, info, data}` wrapper around every HTTP answer
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
    #[serde(rename = "apiStatus")]
    pub api_status: i64,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ApiEnvelope {
    /// Maps non-zero API statuses to errors and returns the `data` member
    pub fn into_data(self) -> Result<Value, CloudError> {
        let info = self.info.unwrap_or_default();
        match self.api_status {
            0 => Ok(self.data.unwrap_or(Value::Null)),
            // wrong email, wrong password, unknown account, account disabled...
            1000..=1008 => Err(CloudError::AuthFailed(format!("{} ({})", info, self.api_status))),
            1019 | 1022 | 1200 => Err(CloudError::SessionExpired),
            status => Err(CloudError::Api { status, info }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInData {
    #[serde(rename = "userid")]
    pub user_id: String,
    pub email: String,
    pub token: String,
    pub key: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(rename = "mqttDomain", default)]
    pub mqtt_domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRecord {
    pub uuid: String,
    #[serde(rename = "devName", default)]
    pub dev_name: String,
    #[serde(rename = "deviceType")]
    pub device_type: String,
    #[serde(rename = "onlineStatus", default = "unknown_status")]
    pub online_status: i64,
    #[serde(default)]
    pub domain: Option<String>,
}

fn unknown_status() -> i64 {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub from: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub method: String,
    pub namespace: String,
    #[serde(rename = "payloadVersion", default = "payload_version")]
    pub payload_version: u32,
    pub sign: String,
    pub timestamp: i64,
    #[serde(rename = "triggerSrc", default, skip_serializing_if = "Option::is_none")]
    pub trigger_src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

fn payload_version() -> u32 {
    1
}

/// Envelope of every MQTT message exchanged with devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerossMessage {
    pub header: MessageHeader,
    #[serde(default)]
    pub payload: Value,
}

impl MerossMessage {
    /// Builds a signed request addressed to `device_uuid`.
    /// Answers will be published on `reply_topic`.
    pub fn request(
        method: &str,
        namespace: &str,
        payload: Value,
        device_uuid: &str,
        key: &str,
        reply_topic: &str,
        timestamp_secs: i64,
    ) -> Self {
        let message_id = md5_hex(&uuid::Uuid::new_v4().to_string());
        let sign = md5_hex(&format!("{message_id}{key}{timestamp_secs}"));
        Self {
            header: MessageHeader {
                from: reply_topic.to_string(),
                message_id,
                method: method.to_string(),
                namespace: namespace.to_string(),
                payload_version: 1,
                sign,
                timestamp: timestamp_secs,
                trigger_src: Some("Android".to_string()),
                uuid: Some(device_uuid.to_string()),
            },
            payload,
        }
    }

    pub fn is_error(&self) -> bool {
        self.header.method == "ERROR"
    }
}

pub fn device_request_topic(device_uuid: &str) -> String {
    format!("/appliance/{device_uuid}/subscribe")
}

pub fn client_reply_topic(user_id: &str, app_id: &str) -> String {
    format!("/app/{user_id}-{app_id}/subscribe")
}

pub fn electricity_request() -> Value {
    serde_json::json!({ "electricity": { "channel": 0 } })
}

#[derive(Debug, Deserialize)]
struct ElectricityPayload {
    electricity: RawElectricity,
}

#[derive(Debug, Deserialize)]
struct RawElectricity {
    /// milliwatts
    power: f64,
    /// decivolts
    #[serde(default)]
    voltage: f64,
    /// milliamps
    #[serde(default)]
    current: f64,
}

/// Decodes the payload of an `Appliance.Control.Electricity` GETACK
pub fn parse_electricity(payload: &Value) -> Result<ElectricityReading, CloudError> {
    let parsed: ElectricityPayload = serde_json::from_value(payload.clone())?;
    let raw = parsed.electricity;
    Ok(ElectricityReading {
        watts: raw.power / 1000.0,
        volts: raw.voltage / 10.0,
        amps: raw.current / 1000.0,
    })
}

/// MQTT broker address, `host[:port]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    pub fn parse(domain: &str) -> Result<Self, CloudError> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(CloudError::Decode("empty MQTT domain".into()));
        }
        match domain.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| CloudError::Decode(format!("invalid MQTT port in {domain:?}")))?;
                Ok(Self { host: host.to_string(), port })
            }
            None => Ok(Self { host: domain.to_string(), port: DEFAULT_MQTT_PORT }),
        }
    }
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
