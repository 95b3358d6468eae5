use serde::{Deserialize, Serialize};

/// Stable device identifier
pub type DeviceKey = String;

/// Kind of media device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    AudioOutput,
    AudioInput,
    VideoInput,
}

/// Selectable device as reported by the platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub key: DeviceKey,

    /// Display hint (e.g. "speaker", "headphones", "bluetooth")
    #[serde(default)]
    pub icon: String,

    pub kind: DeviceKind,

    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl DeviceDescriptor {
    pub fn new(key: impl Into<DeviceKey>, icon: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            key: key.into(),
            icon: icon.into(),
            kind,
            available: true,
        }
    }
}

/// Input device resolved by the platform device-access layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaDevice {
    pub id: DeviceKey,

    #[serde(default)]
    pub label: String,

    /// Underlying hardware track/handle, if the platform bound one
    #[serde(default)]
    pub binding: Option<String>,
}

impl MediaDevice {
    pub fn new(id: impl Into<DeviceKey>) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            binding: None,
        }
    }

    /// Attach a hardware binding
    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = Some(binding.into());
        self
    }

    /// Describe this device for selection lists
    pub fn descriptor(&self, kind: DeviceKind) -> DeviceDescriptor {
        let icon = match kind {
            DeviceKind::VideoInput => "camera",
            DeviceKind::AudioInput => "microphone",
            DeviceKind::AudioOutput => "speaker",
        };
        DeviceDescriptor {
            key: self.id.clone(),
            icon: icon.to_string(),
            kind,
            available: self.binding.is_some(),
        }
    }
}

/// Readiness flags of a bootstrapping session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapState {
    pub signaling_ready: bool,
    pub config_ready: bool,
    pub torn_down: bool,
}

impl BootstrapState {
    /// Signaling and configuration are both ready
    pub fn ready(&self) -> bool {
        self.signaling_ready && self.config_ready && !self.torn_down
    }
}
