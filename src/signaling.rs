//! MQTT-backed collaborators
//!
//! [`MqttSignaling`] owns the broker connection; [`MqttConfigSource`] and
//! [`MqttRoom`] ride on it.

use crate::collaborators::{Collaborators, ConfigSource, RoomClient, SignalingClient};
use crate::connection::Connection;
use crate::error::{Result, SessionError};
use crate::options::SessionOptions;
use crate::protocol::Connect;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::timeout;
use uuid::Uuid;

/// Signaling client over MQTT-on-WebSocket
pub struct MqttSignaling {
    options: SessionOptions,
    client_id: String,
    connected: Arc<watch::Sender<bool>>,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl MqttSignaling {
    pub fn new(options: SessionOptions) -> Self {
        let client_id = format!("{}-{}", options.client_id_prefix, Uuid::new_v4().simple());
        Self {
            options,
            client_id,
            connected: Arc::new(watch::Sender::new(false)),
            connection: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// The live broker connection
    pub async fn connection(&self) -> Result<Arc<Connection>> {
        self.connection
            .lock()
            .await
            .clone()
            .ok_or(SessionError::ConnectionClosed)
    }

    /// Close the broker connection, if open
    pub async fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            tracing::info!("Disconnecting from broker");
            connection.disconnect().await;
        }
        self.connected.send_replace(false);
    }

    /// Bundle this client with MQTT config and room collaborators
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            signaling: self.clone(),
            config: Arc::new(MqttConfigSource::new(self.clone())),
            room: Arc::new(MqttRoom::new(self.clone())),
        }
    }
}

#[async_trait]
impl SignalingClient for MqttSignaling {
    async fn connect(&self) -> Result<()> {
        let mut slot = self.connection.lock().await;
        if slot.is_some() && *self.connected.borrow() {
            tracing::debug!("Signaling already connected");
            return Ok(());
        }

        let connect = Connect {
            client_id: self.client_id.clone(),
            keep_alive: self.options.keep_alive_secs,
            clean_session: true,
            username: None,
            password: None,
        };
        let connection = Connection::connect(
            &self.options.broker_url,
            connect,
            self.options.request_timeout(),
            self.connected.clone(),
        )
        .await?;

        *slot = Some(Arc::new(connection));
        Ok(())
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

/// Reads the retained configuration document from the config topic
pub struct MqttConfigSource {
    signaling: Arc<MqttSignaling>,
    topic: String,
    wait: Duration,
}

impl MqttConfigSource {
    pub fn new(signaling: Arc<MqttSignaling>) -> Self {
        let topic = signaling.options().config_topic.clone();
        let wait = signaling.options().request_timeout();
        Self {
            signaling,
            topic,
            wait,
        }
    }
}

#[async_trait]
impl ConfigSource for MqttConfigSource {
    async fn load_config(&self) -> Result<Value> {
        let connection = self.signaling.connection().await?;
        let mut rx = connection.subscribe(&self.topic).await?;
        tracing::info!("Waiting for configuration on {}", self.topic);

        let publish = timeout(self.wait, async {
            loop {
                match rx.recv().await {
                    Ok(publish) if publish.topic == self.topic => return Ok(publish),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Config receiver lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SessionError::ConnectionClosed)
                    }
                }
            }
        })
        .await
        .map_err(|_| SessionError::ConfigLoad(format!("no configuration on {}", self.topic)))??;

        serde_json::from_slice(&publish.payload)
            .map_err(|e| SessionError::ConfigLoad(format!("configuration is not JSON: {}", e)))
    }
}

/// Room presence over the room topic
pub struct MqttRoom {
    signaling: Arc<MqttSignaling>,
    topic: String,
}

impl MqttRoom {
    pub fn new(signaling: Arc<MqttSignaling>) -> Self {
        let topic = signaling.options().room_topic();
        Self { signaling, topic }
    }

    async fn announce(&self, event: &str) -> Result<()> {
        let payload = json!({ "event": event, "client": self.signaling.client_id() });
        let connection = self.signaling.connection().await?;
        connection
            .publish(&self.topic, serde_json::to_vec(&payload)?, false)
            .await
    }
}

#[async_trait]
impl RoomClient for MqttRoom {
    async fn enter_room(&self) -> Result<()> {
        tracing::info!("Entering room via {}", self.topic);
        self.announce("join")
            .await
            .map_err(|e| SessionError::Room(e.to_string()))
    }

    async fn exit_room(&self) {
        tracing::info!("Leaving room via {}", self.topic);
        if let Err(e) = self.announce("leave").await {
            tracing::warn!("Failed to announce room exit: {}", e);
        }
        self.signaling.disconnect().await;
    }
}
