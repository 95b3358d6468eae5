use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session configuration
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// MQTT-over-WebSocket broker URL
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Prefix for the generated MQTT client id
    #[serde(default = "default_client_prefix")]
    pub client_id_prefix: String,

    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,

    /// Topic carrying the retained gateway/ICE configuration document
    #[serde(default = "default_config_topic")]
    pub config_topic: String,

    /// Room to join
    #[serde(default)]
    pub room: String,

    /// Timeout for broker round-trips, in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// How long to wait for the bridge to confirm an output switch, in milliseconds
    #[serde(default = "default_switch_timeout")]
    pub switch_timeout_ms: u64,

    /// Delay between transport audio negotiation and route activation, in milliseconds
    #[serde(default = "default_route_activation_delay")]
    pub route_activation_delay_ms: u64,

    /// Delay before the device diagnostic pass, in milliseconds
    #[serde(default = "default_diagnostic_delay")]
    pub diagnostic_delay_ms: u64,
}

fn default_broker_url() -> String {
    "wss://localhost:8884/mqtt".to_string()
}

fn default_client_prefix() -> String {
    "viewer".to_string()
}

fn default_keep_alive() -> u16 {
    30
}

fn default_config_topic() -> String {
    "config/gateways".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_switch_timeout() -> u64 {
    5_000
}

fn default_route_activation_delay() -> u64 {
    500
}

fn default_diagnostic_delay() -> u64 {
    1_000
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            client_id_prefix: default_client_prefix(),
            keep_alive_secs: default_keep_alive(),
            config_topic: default_config_topic(),
            room: String::new(),
            request_timeout_ms: default_request_timeout(),
            switch_timeout_ms: default_switch_timeout(),
            route_activation_delay_ms: default_route_activation_delay(),
            diagnostic_delay_ms: default_diagnostic_delay(),
        }
    }
}

impl SessionOptions {
    /// Parse options from a JSON document, filling in defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SessionError::ConfigInvalid(e.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn switch_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_timeout_ms)
    }

    pub fn route_activation_delay(&self) -> Duration {
        Duration::from_millis(self.route_activation_delay_ms)
    }

    pub fn diagnostic_delay(&self) -> Duration {
        Duration::from_millis(self.diagnostic_delay_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    /// Topic used for room presence messages
    pub fn room_topic(&self) -> String {
        format!("rooms/{}/presence", self.room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let options = SessionOptions::from_json_str("{}").unwrap();
        assert_eq!(options.keep_alive_secs, 30);
        assert_eq!(options.switch_timeout(), Duration::from_secs(5));
        assert_eq!(options.diagnostic_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_overrides_and_room_topic() {
        let options =
            SessionOptions::from_json_str(r#"{"room": "stage", "switch_timeout_ms": 250}"#)
                .unwrap();
        assert_eq!(options.switch_timeout(), Duration::from_millis(250));
        assert_eq!(options.room_topic(), "rooms/stage/presence");
    }

    #[test]
    fn test_malformed_document_is_config_invalid() {
        let err = SessionOptions::from_json_str(r#"{"keep_alive_secs": "soon"}"#).unwrap_err();
        assert!(matches!(err, SessionError::ConfigInvalid(_)));
    }
}
