//! Request/response channel to devices through a Meross MQTT broker.
//!
//! Requests are published on the device topic; the device answers on the
//! client's own reply topic with the same `messageId`. Waiting requesters are
//! kept in a pending map and woken through a oneshot channel.

use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, Transport};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::protocol::{self, BrokerEndpoint, MerossMessage};
use super::{CloudError, Session};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<MerossMessage>>>>;

pub struct MqttChannel {
    client: AsyncClient,
    endpoint: BrokerEndpoint,
    reply_topic: String,
    key: String,
    pending: PendingMap,
    request_timeout: Duration,
    event_task: JoinHandle<()>,
}

impl MqttChannel {
    /// Opens a client session on the broker for the account in `session`.
    /// The connection itself is driven by a background task.
    pub fn connect(endpoint: BrokerEndpoint, session: &Session, request_timeout: Duration) -> Self {
        let app_id = protocol::md5_hex(&format!("API{}", uuid::Uuid::new_v4()));
        let reply_topic = protocol::client_reply_topic(&session.user_id, &app_id);

        let mut opts = MqttOptions::new(format!("app:{app_id}"), endpoint.host.clone(), endpoint.port);
        opts.set_credentials(
            session.user_id.clone(),
            protocol::md5_hex(&format!("{}{}", session.user_id, session.key)),
        );
        opts.set_keep_alive(Duration::from_secs(30));
        opts.set_clean_session(true);
        opts.set_transport(Transport::tls_with_default_config());

        let (client, eventloop) = AsyncClient::new(opts, 10);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // queued ahead of any request publish
        if let Err(e) = client.try_subscribe(reply_topic.clone(), QoS::AtLeastOnce) {
            warn!("subscribe to {} failed: {}", reply_topic, e);
        }

        let event_task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            reply_topic.clone(),
            endpoint.clone(),
            pending.clone(),
        ));

        info!("MQTT channel opened towards {}", endpoint);

        Self {
            client,
            endpoint,
            reply_topic,
            key: session.key.clone(),
            pending,
            request_timeout,
            event_task,
        }
    }

    /// Publishes a signed request to a device and waits for its answer
    pub async fn request(
        &self,
        device_uuid: &str,
        method: &str,
        namespace: &str,
        payload: Value,
    ) -> Result<MerossMessage, CloudError> {
        let message = MerossMessage::request(
            method,
            namespace,
            payload,
            device_uuid,
            &self.key,
            &self.reply_topic,
            chrono::Utc::now().timestamp(),
        );
        let message_id = message.header.message_id.clone();

        let body = serde_json::to_vec(&message)?;

        let (tx, rx) = oneshot::channel();
        let _entry = PendingEntry::register(&self.pending, message_id, tx);

        self.client
            .publish(protocol::device_request_topic(device_uuid), QoS::AtMostOnce, false, body)
            .await?;

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(answer)) if answer.is_error() => Err(CloudError::DeviceError {
                uuid: device_uuid.to_string(),
                detail: answer.payload.to_string(),
            }),
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => Err(CloudError::Mqtt(format!("channel to {} closed", self.endpoint))),
            Err(_) => Err(CloudError::Timeout(device_uuid.to_string())),
        }
    }
}

/// Slot of one in-flight request in the pending map. Removed on drop, so a
/// requester that errors, times out or gets cancelled never leaves it behind.
struct PendingEntry<'a> {
    pending: &'a PendingMap,
    message_id: String,
}

impl<'a> PendingEntry<'a> {
    fn register(pending: &'a PendingMap, message_id: String, sender: oneshot::Sender<MerossMessage>) -> Self {
        pending.lock().insert(message_id.clone(), sender);
        Self { pending, message_id }
    }
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.message_id);
    }
}

impl Drop for MqttChannel {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    reply_topic: String,
    endpoint: BrokerEndpoint,
    pending: PendingMap,
) {
    let mut connected_once = false;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                debug!("connected to {}", endpoint);
                // clean session: the reply subscription is lost on every reconnect
                if connected_once {
                    // try_subscribe: awaiting here would stall the loop that drains requests
                    if let Err(e) = client.try_subscribe(reply_topic.clone(), QoS::AtLeastOnce) {
                        warn!("resubscribe to {} failed: {}", reply_topic, e);
                    }
                }
                connected_once = true;
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == reply_topic => {
                dispatch_reply(&pending, &publish.payload);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error on {}: {}", endpoint, e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Hands an incoming answer to the requester waiting on its `messageId`
fn dispatch_reply(pending: &PendingMap, payload: &[u8]) {
    let message: MerossMessage = match serde_json::from_slice(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("unreadable message on reply topic: {}", e);
            return;
        }
    };

    let waiting = pending.lock().remove(&message.header.message_id);
    match waiting {
        Some(sender) => {
            if sender.send(message).is_err() {
                debug!("requester gave up before the answer arrived");
            }
        }
        None => debug!(
            "answer for unknown request {} ({})",
            message.header.message_id, message.header.namespace
        ),
    }
}
