use thiserror::Error;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that can occur while bootstrapping or running a viewing session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Configuration blob is missing `gateways` or `ice_servers`, or is malformed
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// No room-type group contains the requested gateway
    #[error("Gateway not found: {0}")]
    GatewayNotFound(String),

    /// Gateway entry has no `type` field
    #[error("Gateway {0} has no type")]
    GatewayTypeMissing(String),

    /// No ICE servers registered for the gateway's type
    #[error("No ICE servers for gateway type: {0}")]
    IceServersMissing(String),

    /// Platform bridge never confirmed an output switch
    #[error("Audio output switch timed out")]
    SwitchTimedOut,

    /// Signaling connection failed
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Configuration could not be loaded
    #[error("Config load error: {0}")]
    ConfigLoad(String),

    /// Room entry or exit failed
    #[error("Room error: {0}")]
    Room(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed MQTT packet
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timed out waiting for the broker
    #[error("Request timeout")]
    Timeout,

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}
