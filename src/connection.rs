use crate::error::{Result, SessionError};
use crate::protocol::{connack_reason, Connect, Packet, Publish};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// MQTT connection state
struct ConnectionState {
    /// Subscriptions waiting for SUBACK, keyed by packet id
    pending_subscriptions: HashMap<u16, oneshot::Sender<Vec<u8>>>,
    next_packet_id: u16,
    /// Channel for sending outgoing frames
    ws_tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionState {
    fn allocate_packet_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        self.next_packet_id
    }
}

/// MQTT session carried over a WebSocket
pub struct Connection {
    state: Arc<Mutex<ConnectionState>>,
    /// Incoming publishes (outside mutex to allow non-blocking subscribe)
    publish_tx: broadcast::Sender<Publish>,
    request_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Open the socket, send CONNECT and wait for the broker to accept
    ///
    /// `connected` is set to `true` once accepted and back to `false` when the
    /// socket closes.
    pub async fn connect(
        url: &str,
        connect: Connect,
        request_timeout: Duration,
        connected: Arc<watch::Sender<bool>>,
    ) -> Result<Self> {
        tracing::info!("Connecting to broker {}", url);

        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mqtt"));

        let (ws_stream, _) = timeout(request_timeout, connect_async(request))
            .await
            .map_err(|_| SessionError::Timeout)??;
        let (mut write, mut read) = ws_stream.split();

        let keep_alive = Duration::from_secs(u64::from(connect.keep_alive));
        let ping = Packet::PingReq.encode()?;
        write
            .send(Message::Binary(Packet::Connect(connect).encode()?))
            .await?;

        let ack = timeout(request_timeout, read.next())
            .await
            .map_err(|_| SessionError::Timeout)?;
        match ack {
            Some(Ok(Message::Binary(bytes))) => match Packet::decode(&bytes)? {
                Packet::ConnAck { return_code: 0, .. } => {}
                Packet::ConnAck { return_code, .. } => {
                    return Err(SessionError::Signaling(format!(
                        "broker refused connection: {}",
                        connack_reason(return_code)
                    )));
                }
                other => {
                    return Err(SessionError::Protocol(format!(
                        "expected CONNACK, got {:?}",
                        other
                    )));
                }
            },
            Some(Ok(other)) => {
                return Err(SessionError::Protocol(format!(
                    "expected binary CONNACK frame, got {:?}",
                    other
                )));
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(SessionError::ConnectionClosed),
        }

        tracing::info!("Broker accepted connection");
        connected.send_replace(true);

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (publish_tx, _) = broadcast::channel(100);

        let state = Arc::new(Mutex::new(ConnectionState {
            pending_subscriptions: HashMap::new(),
            next_packet_id: 0,
            ws_tx: ws_tx.clone(),
        }));

        // Forward outgoing frames to the socket; ends once every sender is gone
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send frame: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let state_clone = state.clone();
        let publish_tx_clone = publish_tx.clone();
        let read_handle = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Binary(bytes)) => {
                        if let Err(e) =
                            Self::handle_frame(&state_clone, &publish_tx_clone, &bytes).await
                        {
                            tracing::error!("Error handling packet: {}", e);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("Broker closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Connection closed, cancel all pending subscriptions
            state_clone.lock().await.pending_subscriptions.clear();
            connected.send_replace(false);
        });

        let mut tasks = vec![read_handle];
        if !keep_alive.is_zero() {
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(keep_alive);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if ws_tx.send(Message::Binary(ping.clone())).is_err() {
                        break;
                    }
                }
            }));
        }

        Ok(Self {
            state,
            publish_tx,
            request_timeout,
            tasks,
        })
    }

    /// Handle an incoming binary frame
    async fn handle_frame(
        state: &Arc<Mutex<ConnectionState>>,
        publish_tx: &broadcast::Sender<Publish>,
        bytes: &[u8],
    ) -> Result<()> {
        match Packet::decode(bytes)? {
            Packet::Publish(publish) => {
                tracing::debug!("Received publish on {}", publish.topic);
                let _ = publish_tx.send(publish);
            }
            Packet::SubAck {
                packet_id,
                return_codes,
            } => {
                if let Some(tx) = state.lock().await.pending_subscriptions.remove(&packet_id) {
                    let _ = tx.send(return_codes);
                }
            }
            Packet::PingResp => tracing::debug!("Keep-alive acknowledged"),
            other => tracing::debug!("Ignoring unexpected packet: {:?}", other),
        }
        Ok(())
    }

    /// Subscribe to `topic` and return a receiver of incoming publishes
    ///
    /// The receiver is created before the SUBSCRIBE goes out, so retained
    /// messages delivered right after the SUBACK are not missed.
    pub async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<Publish>> {
        let rx = self.publish_tx.subscribe();
        let (tx, ack_rx) = oneshot::channel();

        let packet_id = {
            let mut state = self.state.lock().await;
            let packet_id = state.allocate_packet_id();
            let frame = Packet::Subscribe {
                packet_id,
                topics: vec![topic.to_string()],
            }
            .encode()?;
            state.pending_subscriptions.insert(packet_id, tx);

            tracing::debug!("Subscribing to {} (packet {})", topic, packet_id);
            if state.ws_tx.send(Message::Binary(frame)).is_err() {
                state.pending_subscriptions.remove(&packet_id);
                return Err(SessionError::ConnectionClosed);
            }
            packet_id
        };

        let return_codes = match timeout(self.request_timeout, ack_rx).await {
            Ok(Ok(codes)) => codes,
            Ok(Err(_)) => return Err(SessionError::ConnectionClosed),
            Err(_) => {
                self.state
                    .lock()
                    .await
                    .pending_subscriptions
                    .remove(&packet_id);
                return Err(SessionError::Timeout);
            }
        };

        if return_codes.iter().any(|&code| code >= 0x80) {
            return Err(SessionError::Signaling(format!(
                "subscription to {} refused",
                topic
            )));
        }

        Ok(rx)
    }

    /// Publish a QoS 0 message
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        let frame = Packet::Publish(Publish {
            topic: topic.to_string(),
            payload,
            retain,
        })
        .encode()?;
        tracing::debug!("Publishing to {}", topic);

        self.state
            .lock()
            .await
            .ws_tx
            .send(Message::Binary(frame))
            .map_err(|_| SessionError::ConnectionClosed)
    }

    /// Send DISCONNECT and close the socket
    pub async fn disconnect(&self) {
        let state = self.state.lock().await;
        if let Ok(frame) = Packet::Disconnect.encode() {
            let _ = state.ws_tx.send(Message::Binary(frame));
        }
        let _ = state.ws_tx.send(Message::Close(None));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
