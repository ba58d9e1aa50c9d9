//! Signed HTTP calls against the Meross cloud API.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::protocol::{self, ApiEnvelope, DeviceRecord, SignInData, SignedForm};
use super::{CloudDevice, CloudError, OnlineStatus, Session};
use crate::config::Credentials;

const APP_VERSION: &str = "0.4.6.0";

#[derive(Clone)]
pub struct MerossHttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl MerossHttpClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, CloudError> {
        let mut headers = HeaderMap::new();
        headers.insert("vender", HeaderValue::from_static("meross"));
        headers.insert("appversion", HeaderValue::from_static(APP_VERSION));
        headers.insert("apptype", HeaderValue::from_static("MerossIOT"));
        headers.insert("applanguage", HeaderValue::from_static("EN"));
        headers.insert(USER_AGENT, HeaderValue::from_static("MerossIOT/0.4.6.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Signs in and returns the account session
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session, CloudError> {
        let params = json!({
            "email": credentials.email,
            "password": protocol::md5_hex(&credentials.password),
            "encryption": 1,
            "agree": 0,
        });

        let data = self
            .signed_post(&self.base_url, protocol::SIGN_IN_PATH, &params, None)
            .await?;
        let sign_in: SignInData = serde_json::from_value(data)?;

        // the account may live in another region than the configured one
        let api_base_url = match sign_in.domain.as_deref().map(str::trim) {
            Some(domain) if !domain.is_empty() => domain.trim_end_matches('/').to_string(),
            _ => self.base_url.clone(),
        };

        Ok(Session {
            user_id: sign_in.user_id,
            email: sign_in.email,
            token: sign_in.token,
            key: sign_in.key,
            api_base_url,
            mqtt_domain: sign_in.mqtt_domain.unwrap_or_default(),
        })
    }

    /// Fetches the account's device list
    pub async fn list_devices(&self, session: &Session) -> Result<Vec<CloudDevice>, CloudError> {
        let data = self
            .signed_post(&session.api_base_url, protocol::DEVICE_LIST_PATH, &json!({}), Some(&session.token))
            .await?;
        let records: Vec<DeviceRecord> = match data {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other)?,
        };

        Ok(records
            .into_iter()
            .map(|r| CloudDevice {
                uuid: r.uuid,
                name: r.dev_name,
                device_type: r.device_type,
                online_status: OnlineStatus::from_code(r.online_status),
                domain: r.domain.filter(|d| !d.trim().is_empty()),
            })
            .collect())
    }

    async fn signed_post(
        &self,
        base_url: &str,
        path: &str,
        params: &Value,
        token: Option<&str>,
    ) -> Result<Value, CloudError> {
        let form = SignedForm::now(params)?;
        let authorization = match token {
            Some(token) => format!("Basic {token}"),
            None => "Basic".to_string(),
        };

        let url = format!("{base_url}{path}");
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, authorization)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;

        let envelope: ApiEnvelope = response.json().await?;
        envelope.into_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meross_devkit::{fixtures, CloudStub, StubAccount};

    fn credentials() -> Credentials {
        Credentials { email: "me@example.com".into(), password: "hunter2".into() }
    }

    async fn stub_with_devices(devices: Vec<Value>) -> CloudStub {
        meross_devkit::init_test_logging();
        let stub = CloudStub::start(StubAccount::new("me@example.com", "hunter2")).await.unwrap();
        stub.set_devices(devices);
        stub
    }

    #[tokio::test]
    async fn test_sign_in_and_list_devices() {
        let stub = stub_with_devices(vec![
            fixtures::device_record("uuid-1", "Plug1", "mss310", 1),
            fixtures::device_record("uuid-2", "Lamp", "msl120", 2),
        ])
        .await;
        let client = MerossHttpClient::new(&stub.base_url(), Duration::from_secs(5)).unwrap();

        let session = client.sign_in(&credentials()).await.unwrap();
        assert_eq!(session.email, "me@example.com");
        assert_eq!(session.token, stub.account().token);
        assert_eq!(session.api_base_url, stub.base_url());
        assert_eq!(session.mqtt_domain, stub.account().mqtt_domain);

        let devices = client.list_devices(&session).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Plug1");
        assert_eq!(devices[0].device_type, "mss310");
        assert_eq!(devices[0].online_status, OnlineStatus::Online);
        assert_eq!(devices[1].online_status, OnlineStatus::Offline);

        // every request carried a valid signature
        assert_eq!(stub.requests().len(), 2);
        assert!(stub.requests().iter().all(|r| r.signature_valid));
    }

    #[tokio::test]
    async fn test_wrong_password_is_auth_failure() {
        let stub = stub_with_devices(vec![]).await;
        let client = MerossHttpClient::new(&stub.base_url(), Duration::from_secs(5)).unwrap();

        let err = client
            .sign_in(&Credentials { email: "me@example.com".into(), password: "nope".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn test_expired_token_is_reported() {
        let stub = stub_with_devices(vec![fixtures::device_record("uuid-1", "Plug1", "mss310", 1)]).await;
        let client = MerossHttpClient::new(&stub.base_url(), Duration::from_secs(5)).unwrap();

        let session = client.sign_in(&credentials()).await.unwrap();
        stub.expire_tokens();

        let err = client.list_devices(&session).await.unwrap_err();
        assert!(matches!(err, CloudError::SessionExpired));

        // a fresh sign-in gets a working token again
        let session = client.sign_in(&credentials()).await.unwrap();
        assert_eq!(client.list_devices(&session).await.unwrap().len(), 1);
    }
}
