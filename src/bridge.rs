//! Platform audio bridge
//!
//! Native shells expose audio routing through an [`AudioBridge`]. Platforms
//! without one use [`AudioRouting::Absent`], on which every call is a no-op.

use crate::error::Result;
use crate::types::DeviceDescriptor;
use async_trait::async_trait;
use std::sync::Arc;

/// Native audio capabilities provided by the host platform
#[async_trait]
pub trait AudioBridge: Send + Sync {
    /// Whether the platform can switch the output device directly
    ///
    /// Platforms that answer `false` route audio through the focus calls instead.
    fn supports_output_switch(&self) -> bool;

    /// Enumerate selectable audio outputs
    async fn init_discovery(&self) -> Vec<DeviceDescriptor>;

    /// Switch output to `key`; resolves once the platform confirms
    ///
    /// May never resolve if the platform drops the request.
    async fn switch_output(&self, key: &str) -> Result<()>;

    /// Tell the platform the active device changed
    async fn notify_device_change(&self, key: &str);

    /// Request audio focus for playback
    async fn request_focus(&self);

    /// Activate the negotiated output route
    async fn activate_output(&self);

    /// Give up audio focus
    async fn release_focus(&self);
}

/// Audio routing strategy for the running platform
#[derive(Clone, Default)]
pub enum AudioRouting {
    /// Platform bridge is available
    Present(Arc<dyn AudioBridge>),

    /// No native bridge; all calls do nothing
    #[default]
    Absent,
}

impl AudioRouting {
    pub fn new(bridge: Option<Arc<dyn AudioBridge>>) -> Self {
        match bridge {
            Some(bridge) => Self::Present(bridge),
            None => Self::Absent,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn supports_output_switch(&self) -> bool {
        match self {
            Self::Present(bridge) => bridge.supports_output_switch(),
            Self::Absent => false,
        }
    }

    /// Whether output routing is driven by focus request/activate/release
    pub fn uses_focus_routing(&self) -> bool {
        self.is_present() && !self.supports_output_switch()
    }

    pub async fn init_discovery(&self) -> Vec<DeviceDescriptor> {
        match self {
            Self::Present(bridge) => bridge.init_discovery().await,
            Self::Absent => Vec::new(),
        }
    }

    pub async fn switch_output(&self, key: &str) -> Result<()> {
        match self {
            Self::Present(bridge) if bridge.supports_output_switch() => {
                bridge.switch_output(key).await
            }
            _ => Ok(()),
        }
    }

    pub async fn notify_device_change(&self, key: &str) {
        if let Self::Present(bridge) = self {
            bridge.notify_device_change(key).await;
        }
    }

    pub async fn request_focus(&self) {
        if let Self::Present(bridge) = self {
            bridge.request_focus().await;
        }
    }

    pub async fn activate_output(&self) {
        if let Self::Present(bridge) = self {
            bridge.activate_output().await;
        }
    }

    pub async fn release_focus(&self) {
        if let Self::Present(bridge) = self {
            bridge.release_focus().await;
        }
    }
}

impl std::fmt::Debug for AudioRouting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Present(bridge) => f
                .debug_struct("Present")
                .field("output_switch", &bridge.supports_output_switch())
                .finish(),
            Self::Absent => f.write_str("Absent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_bridge_is_silent() {
        let routing = AudioRouting::new(None);
        assert!(!routing.is_present());
        assert!(!routing.uses_focus_routing());
        assert!(routing.init_discovery().await.is_empty());
        assert!(routing.switch_output("speaker").await.is_ok());
        routing.request_focus().await;
        routing.activate_output().await;
        routing.release_focus().await;
        routing.notify_device_change("speaker").await;
    }
}
