//! Session core for live-broadcast viewing clients
//!
//! This library sequences everything a viewer needs before media can flow
//! from a WebRTC media gateway:
//!
//! - Signaling over MQTT-on-WebSocket
//! - Gateway/ICE configuration loading and gateway resolution
//! - Room entry and guaranteed room exit
//! - Audio output selection through an optional platform bridge
//! - Microphone/camera discovery with partial-failure handling
//!
//! # Quick Start
//!
//! ```no_run
//! use livecast_session::{AudioRouting, Bootstrap, MqttSignaling, SessionOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = SessionOptions::from_json_str(r#"{"room": "stage"}"#)?;
//!     let signaling = Arc::new(MqttSignaling::new(options.clone()));
//!
//!     let bootstrap = Bootstrap::new(signaling.collaborators(), AudioRouting::Absent, &options);
//!     let mut session = bootstrap.activate();
//!     session.wait_ready().await?;
//!
//!     let gateway = session.registry().resolve("main")?;
//!     println!("Gateway {} with {} ICE server(s)", gateway.name, gateway.ice_servers.len());
//!
//!     session.teardown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Bootstrap**: signaling → (configuration ∥ room entry) → ready, and teardown
//! - **Registry**: gateway configuration and name resolution
//! - **Audio**: output device list, selection and busy guard
//! - **Devices**: one-shot microphone/camera discovery
//! - **Bridge**: platform audio capabilities, present or absent
//! - **Signaling / Connection / Protocol**: MQTT collaborators, socket handling, packet codec

mod audio;
mod bootstrap;
mod bridge;
mod collaborators;
mod connection;
mod devices;
mod edge;
mod error;
mod events;
mod options;
mod protocol;
mod registry;
mod signaling;
mod types;

// Public exports
pub use audio::{AudioDeviceManager, DeviceSelectionState, InitOutcome, Operation, SelectOutcome};
pub use bootstrap::{Bootstrap, BootstrapPhase, Session};
pub use bridge::{AudioBridge, AudioRouting};
pub use collaborators::{Collaborators, ConfigSource, RoomClient, SignalingClient};
pub use connection::Connection;
pub use devices::{
    unbound_devices, DeviceDiscovery, DeviceEnumerator, DeviceProbe, InputDeviceState,
    MediaDevices,
};
pub use edge::RisingEdge;
pub use error::{Result, SessionError};
pub use events::{EventBus, EventReceiver, SessionEvent};
pub use options::SessionOptions;
pub use protocol::{Connect, Packet, Publish};
pub use registry::{ConfigRegistry, GatewayRegistryConfig, IceServer, ResolvedGateway};
pub use signaling::{MqttConfigSource, MqttRoom, MqttSignaling};
pub use types::{BootstrapState, DeviceDescriptor, DeviceKey, DeviceKind, MediaDevice};
