//! Input device discovery
//!
//! Opens the microphone and camera once through the platform's
//! [`MediaDevices`] layer, keeps whatever it managed to resolve, and warns the
//! session about the rest.

use crate::events::{EventBus, SessionEvent};
use crate::types::{DeviceKind, MediaDevice};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Platform device-access layer
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Try to open one audio and one video input
    async fn discover(&self) -> DeviceDiscovery;
}

/// Outcome of opening one kind of input
///
/// A probe may carry both a device and an error when the platform resolved a
/// device but could not fully open it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProbe {
    pub device: Option<MediaDevice>,
    pub error: Option<String>,
}

impl DeviceProbe {
    pub fn found(device: MediaDevice) -> Self {
        Self {
            device: Some(device),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            device: None,
            error: Some(error.into()),
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of one discovery round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDiscovery {
    pub audio: DeviceProbe,
    pub video: DeviceProbe,
}

/// Input devices committed for the session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputDeviceState {
    pub audio_input: Option<MediaDevice>,
    pub video_input: Option<MediaDevice>,
    pub camera_muted: bool,
}

/// One-shot discovery of audio/video inputs
pub struct DeviceEnumerator {
    devices: Arc<dyn MediaDevices>,
    state: watch::Sender<InputDeviceState>,
    events: EventBus,
    diagnostic_delay: Duration,
}

impl DeviceEnumerator {
    pub fn new(devices: Arc<dyn MediaDevices>, events: EventBus, diagnostic_delay: Duration) -> Self {
        Self {
            devices,
            state: watch::Sender::new(InputDeviceState::default()),
            events,
            diagnostic_delay,
        }
    }

    pub fn state(&self) -> InputDeviceState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<InputDeviceState> {
        self.state.subscribe()
    }

    /// Run discovery, commit resolved devices and raise warnings
    ///
    /// A delayed diagnostic pass is spawned in the background; its handle is
    /// returned alongside the result.
    pub async fn discover(&self) -> (DeviceDiscovery, JoinHandle<Vec<DeviceKind>>) {
        let result = self.devices.discover().await;
        self.apply(&result);

        let delay = self.diagnostic_delay;
        let snapshot = result.clone();
        let diagnostics = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            unbound_devices(&snapshot)
        });

        (result, diagnostics)
    }

    fn apply(&self, result: &DeviceDiscovery) {
        let mute_camera = match (result.audio.is_err(), result.video.is_err()) {
            (true, true) => {
                tracing::warn!("No input devices available");
                self.events.emit(SessionEvent::NoInputDevices);
                true
            }
            (true, false) => {
                tracing::warn!("Audio input not detected: {:?}", result.audio.error);
                self.events.emit(SessionEvent::AudioInputNotDetected);
                false
            }
            (false, true) => {
                tracing::warn!("Video input not detected: {:?}", result.video.error);
                self.events.emit(SessionEvent::VideoInputNotDetected);
                true
            }
            (false, false) => false,
        };

        self.state.send_modify(|state| {
            if let Some(device) = &result.audio.device {
                state.audio_input = Some(device.clone());
            }
            if let Some(device) = &result.video.device {
                state.video_input = Some(device.clone());
            }
            if mute_camera {
                state.camera_muted = true;
            }
        });

        if mute_camera {
            self.events.emit(SessionEvent::CameraMuted);
        }
        tracing::info!(
            "Input devices committed: audio={:?} video={:?}",
            result.audio.device.as_ref().map(|d| &d.id),
            result.video.device.as_ref().map(|d| &d.id)
        );
    }
}

/// Log resolved devices that have no hardware binding
///
/// Telemetry only; returns the affected kinds.
pub fn unbound_devices(result: &DeviceDiscovery) -> Vec<DeviceKind> {
    let probes = [
        (DeviceKind::AudioInput, &result.audio),
        (DeviceKind::VideoInput, &result.video),
    ];

    let mut unbound = Vec::new();
    for (kind, probe) in probes {
        if let Some(device) = &probe.device {
            if device.binding.is_none() {
                tracing::warn!("{:?} device {} has no hardware binding", kind, device.id);
                unbound.push(kind);
            }
        }
    }
    unbound
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDevices(DeviceDiscovery);

    #[async_trait]
    impl MediaDevices for FixedDevices {
        async fn discover(&self) -> DeviceDiscovery {
            self.0.clone()
        }
    }

    fn enumerator(result: DeviceDiscovery, events: &EventBus) -> DeviceEnumerator {
        DeviceEnumerator::new(
            Arc::new(FixedDevices(result)),
            events.clone(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_audio_failure_keeps_video() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let enumerator = enumerator(
            DeviceDiscovery {
                audio: DeviceProbe::failed("NotFoundError"),
                video: DeviceProbe::found(MediaDevice::new("cam1").with_binding("track-1")),
            },
            &events,
        );

        enumerator.discover().await;

        let state = enumerator.state();
        assert_eq!(state.video_input.map(|d| d.id), Some("cam1".to_string()));
        assert!(state.audio_input.is_none());
        assert!(!state.camera_muted);
        assert_eq!(rx.drain(), vec![SessionEvent::AudioInputNotDetected]);
    }

    #[tokio::test]
    async fn test_total_failure_mutes_camera() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let enumerator = enumerator(
            DeviceDiscovery {
                audio: DeviceProbe::failed("denied"),
                video: DeviceProbe::failed("denied"),
            },
            &events,
        );

        enumerator.discover().await;

        assert!(enumerator.state().camera_muted);
        assert_eq!(
            rx.drain(),
            vec![SessionEvent::NoInputDevices, SessionEvent::CameraMuted]
        );
    }

    #[tokio::test]
    async fn test_video_failure_commits_partial_device() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let enumerator = enumerator(
            DeviceDiscovery {
                audio: DeviceProbe::found(MediaDevice::new("mic1").with_binding("track-a")),
                video: DeviceProbe {
                    device: Some(MediaDevice::new("cam-busy")),
                    error: Some("NotReadableError".to_string()),
                },
            },
            &events,
        );

        enumerator.discover().await;

        let state = enumerator.state();
        assert_eq!(state.audio_input.map(|d| d.id), Some("mic1".to_string()));
        assert_eq!(state.video_input.map(|d| d.id), Some("cam-busy".to_string()));
        assert!(state.camera_muted);
        assert_eq!(
            rx.drain(),
            vec![SessionEvent::VideoInputNotDetected, SessionEvent::CameraMuted]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnostics_do_not_touch_state() {
        let events = EventBus::new();
        let enumerator = enumerator(
            DeviceDiscovery {
                audio: DeviceProbe::found(MediaDevice::new("mic1")),
                video: DeviceProbe::found(MediaDevice::new("cam1").with_binding("track-v")),
            },
            &events,
        );

        let (_, diagnostics) = enumerator.discover().await;
        let before = enumerator.state();

        assert_eq!(diagnostics.await.unwrap(), vec![DeviceKind::AudioInput]);
        assert_eq!(enumerator.state(), before);
        assert!(!before.camera_muted);
    }
}
