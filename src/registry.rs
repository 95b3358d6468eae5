//! Gateway/ICE configuration registry
//!
//! Holds the one configuration blob a session runs with and turns a gateway
//! name into a connection descriptor the media transport can use.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Gateway and ICE server configuration
///
/// `gateways` maps room type → gateway name → gateway parameters, in the
/// order the document declared them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayRegistryConfig {
    pub gateways: Map<String, Value>,
    pub ice_servers: BTreeMap<String, Vec<String>>,
}

/// Single STUN/TURN endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServer {
    pub url: String,
}

/// Gateway parameters merged with the ICE servers for its type
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolvedGateway {
    #[serde(skip)]
    pub name: String,

    /// Room-type group the gateway was found in
    #[serde(skip)]
    pub room_type: String,

    #[serde(flatten)]
    pub params: Map<String, Value>,

    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

impl ResolvedGateway {
    /// The gateway's `type` tag
    pub fn gateway_type(&self) -> &str {
        self.params.get("type").and_then(Value::as_str).unwrap_or_default()
    }
}

fn take_required(root: &mut Map<String, Value>, key: &str) -> Result<Value> {
    match root.remove(key) {
        None | Some(Value::Null) => Err(SessionError::ConfigInvalid(format!("missing {}", key))),
        Some(value) => Ok(value),
    }
}

impl GatewayRegistryConfig {
    /// Validate and convert a raw configuration document
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut root) = value else {
            return Err(SessionError::ConfigInvalid("configuration is not an object".to_string()));
        };

        let gateways = take_required(&mut root, "gateways")?;
        let ice_servers = take_required(&mut root, "ice_servers")?;

        let Value::Object(gateways) = gateways else {
            return Err(SessionError::ConfigInvalid("gateways is not an object".to_string()));
        };
        let Value::Object(ice_servers) = ice_servers else {
            return Err(SessionError::ConfigInvalid("ice_servers is not an object".to_string()));
        };

        // Entries of the wrong shape are kept out here and surface from resolve
        let ice_servers = ice_servers
            .into_iter()
            .filter_map(|(gateway_type, urls)| {
                match serde_json::from_value::<Vec<String>>(urls) {
                    Ok(urls) => Some((gateway_type, urls)),
                    Err(e) => {
                        tracing::warn!("Ignoring ICE servers for {}: {}", gateway_type, e);
                        None
                    }
                }
            })
            .collect();

        Ok(Self {
            gateways,
            ice_servers,
        })
    }

    /// Names of the gateways registered under `room_type`, in registry order
    pub fn gateway_names(&self, room_type: &str) -> Vec<String> {
        self.gateways
            .get(room_type)
            .and_then(Value::as_object)
            .map(|group| group.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolve a gateway by name
    ///
    /// Groups are scanned in declaration order and the first match wins, even
    /// when the same name is registered under several room types.
    pub fn resolve(&self, name: &str) -> Result<ResolvedGateway> {
        let (room_type, entry) = self
            .gateways
            .iter()
            .find_map(|(room_type, group)| {
                group
                    .as_object()
                    .and_then(|group| group.get(name))
                    .map(|entry| (room_type, entry))
            })
            .ok_or_else(|| SessionError::GatewayNotFound(name.to_string()))?;

        let (entry, gateway_type) = entry
            .as_object()
            .and_then(|entry| Some((entry, entry.get("type")?.as_str()?)))
            .ok_or_else(|| SessionError::GatewayTypeMissing(name.to_string()))?;

        let urls = self
            .ice_servers
            .get(gateway_type)
            .ok_or_else(|| SessionError::IceServersMissing(gateway_type.to_string()))?;

        let params = entry
            .iter()
            .filter(|(key, _)| key.as_str() != "iceServers")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(ResolvedGateway {
            name: name.to_string(),
            room_type: room_type.clone(),
            params,
            ice_servers: urls.iter().map(|url| IceServer { url: url.clone() }).collect(),
        })
    }
}

/// Owner of the session's gateway configuration
///
/// The registry is the only writer of the configuration value. Consumers hold
/// it by `Arc` and read through [`gateway_names`](Self::gateway_names) and
/// [`resolve`](Self::resolve).
pub struct ConfigRegistry {
    current: watch::Sender<Option<Arc<GatewayRegistryConfig>>>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self {
            current: watch::Sender::new(None),
        }
    }

    /// Store a configuration document, replacing any previous one
    pub fn set_config(&self, value: Value) -> Result<()> {
        self.set_config_unless(value, || false).map(|_| ())
    }

    /// Store a configuration document unless `cancelled` returns true
    ///
    /// `cancelled` is evaluated while the registry is locked, so a concurrent
    /// [`reset`](Self::reset) issued after cancellation can never be undone by
    /// this write. Returns whether the document was stored.
    pub fn set_config_unless(&self, value: Value, cancelled: impl FnOnce() -> bool) -> Result<bool> {
        let config = Arc::new(GatewayRegistryConfig::from_value(value)?);
        let stored = self.current.send_if_modified(|current| {
            if cancelled() {
                return false;
            }
            *current = Some(config.clone());
            true
        });

        if stored {
            tracing::info!(
                "Configuration loaded: {} room type(s), {} ICE server type(s)",
                config.gateways.len(),
                config.ice_servers.len()
            );
        } else {
            tracing::debug!("Discarding configuration loaded for a cancelled session");
        }
        Ok(stored)
    }

    /// Parse and store a JSON configuration document
    pub fn set_config_str(&self, json: &str) -> Result<()> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| SessionError::ConfigInvalid(e.to_string()))?;
        self.set_config(value)
    }

    /// Drop the stored configuration
    pub fn reset(&self) {
        self.current.send_replace(None);
    }

    pub fn is_set(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Current configuration, if any
    pub fn snapshot(&self) -> Option<Arc<GatewayRegistryConfig>> {
        self.current.borrow().clone()
    }

    /// Watch configuration changes
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<GatewayRegistryConfig>>> {
        self.current.subscribe()
    }

    /// Gateway names for a room type; empty when unset or unknown
    pub fn gateway_names(&self, room_type: &str) -> Vec<String> {
        self.snapshot()
            .map(|config| config.gateway_names(room_type))
            .unwrap_or_default()
    }

    /// Resolve a gateway name into a connection descriptor
    pub fn resolve(&self, name: &str) -> Result<ResolvedGateway> {
        match self.snapshot() {
            Some(config) => config.resolve(name),
            None => Err(SessionError::GatewayNotFound(name.to_string())),
        }
    }
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "gateways": { "rooms": { "main": { "type": "a" } } },
            "ice_servers": { "a": ["stun:x"] }
        })
    }

    #[test]
    fn test_set_config_requires_both_sections() {
        let registry = ConfigRegistry::new();

        let err = registry
            .set_config(json!({ "ice_servers": { "a": ["stun:x"] } }))
            .unwrap_err();
        assert!(matches!(err, SessionError::ConfigInvalid(_)));

        let err = registry
            .set_config(json!({ "gateways": {}, "ice_servers": null }))
            .unwrap_err();
        assert!(matches!(err, SessionError::ConfigInvalid(_)));
        assert!(!registry.is_set());

        registry.set_config(sample()).unwrap();
        assert!(registry.is_set());
    }

    #[test]
    fn test_gateway_names() {
        let registry = ConfigRegistry::new();
        assert!(registry.gateway_names("rooms").is_empty());

        registry.set_config(sample()).unwrap();
        assert_eq!(registry.gateway_names("rooms"), vec!["main".to_string()]);
        assert!(registry.gateway_names("other").is_empty());
    }

    #[test]
    fn test_resolve_merges_ice_servers() {
        let registry = ConfigRegistry::new();
        registry.set_config(sample()).unwrap();

        let resolved = registry.resolve("main").unwrap();
        assert_eq!(resolved.gateway_type(), "a");
        assert_eq!(resolved.room_type, "rooms");
        assert_eq!(
            serde_json::to_value(&resolved).unwrap(),
            json!({ "type": "a", "iceServers": [{ "url": "stun:x" }] })
        );

        let err = registry.resolve("missing").unwrap_err();
        assert!(matches!(err, SessionError::GatewayNotFound(name) if name == "missing"));
    }

    #[test]
    fn test_resolve_without_type() {
        let registry = ConfigRegistry::new();
        registry
            .set_config(json!({
                "gateways": { "rooms": { "bare": { "host": "gw.local" } } },
                "ice_servers": { "a": ["stun:x"] }
            }))
            .unwrap();

        let err = registry.resolve("bare").unwrap_err();
        assert!(matches!(err, SessionError::GatewayTypeMissing(_)));
    }

    #[test]
    fn test_resolve_without_ice_servers_for_type() {
        let registry = ConfigRegistry::new();
        registry
            .set_config(json!({
                "gateways": { "rooms": { "main": { "type": "b" } } },
                "ice_servers": { "a": ["stun:x"] }
            }))
            .unwrap();

        let err = registry.resolve("main").unwrap_err();
        assert!(matches!(err, SessionError::IceServersMissing(t) if t == "b"));
    }

    #[test]
    fn test_ice_servers_keep_order_and_count() {
        let registry = ConfigRegistry::new();
        registry
            .set_config(json!({
                "gateways": { "rooms": { "main": { "type": "janus", "url": "wss://gw" } } },
                "ice_servers": { "janus": ["stun:one", "turn:two", "turn:three"] }
            }))
            .unwrap();

        let resolved = registry.resolve("main").unwrap();
        let urls: Vec<_> = resolved.ice_servers.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["stun:one", "turn:two", "turn:three"]);
        assert_eq!(resolved.params.get("url"), Some(&json!("wss://gw")));
    }

    #[test]
    fn test_first_group_wins_for_duplicate_names() {
        let registry = ConfigRegistry::new();
        registry
            .set_config(json!({
                "gateways": {
                    "webinar": { "shared": { "type": "b" } },
                    "rooms": { "shared": { "type": "a" } }
                },
                "ice_servers": { "a": ["stun:a"], "b": ["stun:b"] }
            }))
            .unwrap();

        let resolved = registry.resolve("shared").unwrap();
        assert_eq!(resolved.room_type, "webinar");
        assert_eq!(resolved.gateway_type(), "b");
    }

    #[test]
    fn test_malformed_entries_fail_on_resolve() {
        let registry = ConfigRegistry::new();
        registry
            .set_config(json!({
                "gateways": {
                    "broken": 7,
                    "rooms": { "odd": "not-an-object", "main": { "type": "a" }, "b": { "type": "b" } }
                },
                "ice_servers": { "a": ["stun:x"], "b": [1, 2] }
            }))
            .unwrap();

        assert!(registry.gateway_names("broken").is_empty());
        assert!(matches!(
            registry.resolve("odd"),
            Err(SessionError::GatewayTypeMissing(name)) if name == "odd"
        ));
        assert!(matches!(
            registry.resolve("b"),
            Err(SessionError::IceServersMissing(kind)) if kind == "b"
        ));
        assert_eq!(registry.resolve("main").unwrap().ice_servers.len(), 1);
    }

    #[test]
    fn test_cancelled_write_does_not_land() {
        let registry = ConfigRegistry::new();
        assert!(!registry.set_config_unless(sample(), || true).unwrap());
        assert!(!registry.is_set());

        assert!(registry.set_config_unless(sample(), || false).unwrap());
        assert!(registry.is_set());
    }

    #[test]
    fn test_set_config_replaces_and_reset_clears() {
        let registry = ConfigRegistry::new();
        registry.set_config(sample()).unwrap();
        registry
            .set_config(json!({
                "gateways": { "rooms": { "backup": { "type": "a" } } },
                "ice_servers": { "a": ["stun:y"] }
            }))
            .unwrap();

        assert_eq!(registry.gateway_names("rooms"), vec!["backup".to_string()]);
        assert!(registry.resolve("main").is_err());

        registry.reset();
        assert!(!registry.is_set());
        assert!(registry.gateway_names("rooms").is_empty());
    }
}
