//! Interfaces of the services the orchestrator drives

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Signaling channel used to coordinate room setup
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Open the signaling connection
    async fn connect(&self) -> Result<()>;

    /// Readiness signal; `true` while connected
    fn connected(&self) -> watch::Receiver<bool>;
}

/// Source of the gateway/ICE configuration document
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load_config(&self) -> Result<Value>;
}

/// Room and chat membership
#[async_trait]
pub trait RoomClient: Send + Sync {
    async fn enter_room(&self) -> Result<()>;

    /// Release room resources
    async fn exit_room(&self);
}

/// Everything a session needs from the outside
#[derive(Clone)]
pub struct Collaborators {
    pub signaling: Arc<dyn SignalingClient>,
    pub config: Arc<dyn ConfigSource>,
    pub room: Arc<dyn RoomClient>,
}
