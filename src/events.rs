use crate::error::{Result, SessionError};
use crate::types::DeviceKey;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Notification raised by the session for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Neither a microphone nor a camera could be opened
    NoInputDevices,

    /// Microphone could not be opened; video continues
    AudioInputNotDetected,

    /// Camera could not be opened
    VideoInputNotDetected,

    /// Camera was forced off
    CameraMuted,

    /// Audio output list finished loading
    OutputDevicesLoaded(usize),

    /// Audio output switched to the given device
    OutputSwitched(DeviceKey),

    /// Signaling connection went up or down
    SignalingChanged(bool),

    /// Signaling and configuration are both ready
    Ready,

    /// Session was torn down
    TornDown,
}

/// Fan-out of session events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn emit(&self, event: SessionEvent) {
        tracing::debug!("Session event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.tx.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for session events
pub struct EventReceiver {
    rx: broadcast::Receiver<SessionEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    pub async fn recv(&mut self) -> Result<SessionEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => SessionError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                SessionError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive an event without waiting
    ///
    /// Returns `None` if no event is queued.
    pub fn try_recv(&mut self) -> Result<Option<SessionEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(SessionError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(SessionError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }

    /// Drain every queued event
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
