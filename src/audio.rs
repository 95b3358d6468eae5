//! Audio output device manager
//!
//! Owns the selectable output list and the current selection. Discovery and
//! switching are mutually exclusive: while one is in flight the manager is
//! `busy` and a second operation is coalesced or rejected. Each operation
//! carries a token; [`AudioDeviceManager::abort`] invalidates it so a late
//! completion from the platform cannot touch state.

use crate::bridge::AudioRouting;
use crate::error::{Result, SessionError};
use crate::events::{EventBus, SessionEvent};
use crate::types::{DeviceDescriptor, DeviceKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Operation currently held by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operation {
    #[default]
    Idle,
    Discovering,
    Switching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Discovering(u64),
    Switching(u64),
}

impl Phase {
    fn token(self) -> Option<u64> {
        match self {
            Phase::Idle => None,
            Phase::Discovering(token) | Phase::Switching(token) => Some(token),
        }
    }
}

/// Output device list, selection and busy flag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelectionState {
    pub devices: Vec<DeviceDescriptor>,
    pub selected: Option<DeviceDescriptor>,
    pub busy: bool,
    phase: Phase,
}

impl DeviceSelectionState {
    pub fn operation(&self) -> Operation {
        match self.phase {
            Phase::Idle => Operation::Idle,
            Phase::Discovering(_) => Operation::Discovering,
            Phase::Switching(_) => Operation::Switching,
        }
    }

    fn begin(&mut self, phase: Phase) -> bool {
        if self.busy {
            return false;
        }
        self.phase = phase;
        self.busy = true;
        true
    }

    fn finish(&mut self) {
        self.phase = Phase::Idle;
        self.busy = false;
    }
}

/// Result of [`AudioDeviceManager::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Discovery completed with this many devices
    Discovered(usize),
    /// Another operation was already in flight; no discovery was started
    Coalesced,
    /// Discovery was aborted before it completed
    Aborted,
}

/// Result of [`AudioDeviceManager::select`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Platform confirmed the switch and the selection was committed
    Switched,
    /// Manager was busy; nothing changed
    Rejected,
    /// Platform has no direct output switch
    Unsupported,
    /// Switch was aborted before the platform confirmed it
    Aborted,
}

/// Clears the phase if the owning future is dropped before completing
struct PendingOp<'a> {
    state: &'a watch::Sender<DeviceSelectionState>,
    token: u64,
    armed: bool,
}

impl<'a> PendingOp<'a> {
    fn new(state: &'a watch::Sender<DeviceSelectionState>, token: u64) -> Self {
        Self {
            state,
            token,
            armed: true,
        }
    }

    /// Apply `commit` and return to idle if this operation is still current
    fn complete(mut self, commit: impl FnOnce(&mut DeviceSelectionState)) -> bool {
        self.armed = false;
        let token = self.token;
        self.state.send_if_modified(|state| {
            if state.phase.token() != Some(token) {
                return false;
            }
            commit(state);
            state.finish();
            true
        })
    }
}

impl Drop for PendingOp<'_> {
    fn drop(&mut self) {
        if self.armed {
            let token = self.token;
            self.state.send_if_modified(|state| {
                if state.phase.token() != Some(token) {
                    return false;
                }
                state.finish();
                true
            });
        }
    }
}

/// Manager for selectable audio outputs
pub struct AudioDeviceManager {
    routing: AudioRouting,
    state: watch::Sender<DeviceSelectionState>,
    next_token: AtomicU64,
    switch_timeout: Duration,
    events: EventBus,
}

impl AudioDeviceManager {
    pub fn new(routing: AudioRouting, switch_timeout: Duration, events: EventBus) -> Self {
        Self {
            routing,
            state: watch::Sender::new(DeviceSelectionState::default()),
            next_token: AtomicU64::new(1),
            switch_timeout,
            events,
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> DeviceSelectionState {
        self.state.borrow().clone()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<DeviceSelectionState> {
        self.state.subscribe()
    }

    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Wait until the operation identified by `token` is no longer current
    async fn superseded(&self, token: u64) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.phase.token() != Some(token)).await;
    }

    /// Discover selectable outputs through the platform bridge
    pub async fn init(&self) -> InitOutcome {
        let token = self.token();
        if !self
            .state
            .send_if_modified(|state| state.begin(Phase::Discovering(token)))
        {
            tracing::debug!("Audio device discovery already in flight");
            return InitOutcome::Coalesced;
        }

        let op = PendingOp::new(&self.state, token);
        tracing::debug!("Discovering audio outputs");

        let devices = tokio::select! {
            devices = self.routing.init_discovery() => devices,
            _ = self.superseded(token) => {
                tracing::debug!("Audio device discovery aborted");
                return InitOutcome::Aborted;
            }
        };

        let count = devices.len();
        if op.complete(move |state| state.devices = devices) {
            tracing::info!("Discovered {} audio output(s)", count);
            self.events.emit(SessionEvent::OutputDevicesLoaded(count));
            InitOutcome::Discovered(count)
        } else {
            InitOutcome::Aborted
        }
    }

    /// Switch audio output to the device identified by `key`
    ///
    /// Returns [`SelectOutcome::Rejected`] without touching state while another
    /// operation is in flight, and [`SessionError::SwitchTimedOut`] if the
    /// platform does not confirm in time.
    pub async fn select(&self, key: &str) -> Result<SelectOutcome> {
        if !self.routing.supports_output_switch() {
            tracing::debug!("Output switch not available on this platform");
            return Ok(SelectOutcome::Unsupported);
        }

        let token = self.token();
        if !self
            .state
            .send_if_modified(|state| state.begin(Phase::Switching(token)))
        {
            tracing::debug!("Audio manager busy, rejecting switch to {}", key);
            return Ok(SelectOutcome::Rejected);
        }

        let op = PendingOp::new(&self.state, token);
        tracing::info!("Switching audio output to {}", key);

        let confirmed = tokio::select! {
            result = timeout(self.switch_timeout, self.routing.switch_output(key)) => result,
            _ = self.superseded(token) => {
                tracing::debug!("Audio output switch to {} aborted", key);
                return Ok(SelectOutcome::Aborted);
            }
        };

        match confirmed {
            Err(_) => {
                tracing::warn!("Audio output switch to {} timed out", key);
                if op.complete(|_| {}) {
                    Err(SessionError::SwitchTimedOut)
                } else {
                    Ok(SelectOutcome::Aborted)
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Audio output switch to {} failed: {}", key, e);
                op.complete(|_| {});
                Err(e)
            }
            Ok(Ok(())) => {
                let committed = op.complete(|state| {
                    let descriptor = state
                        .devices
                        .iter()
                        .find(|device| device.key == key)
                        .cloned()
                        .unwrap_or_else(|| DeviceDescriptor::new(key, "", DeviceKind::AudioOutput));
                    state.selected = Some(descriptor);
                });
                if !committed {
                    return Ok(SelectOutcome::Aborted);
                }
                self.routing.notify_device_change(key).await;
                self.events.emit(SessionEvent::OutputSwitched(key.to_string()));
                Ok(SelectOutcome::Switched)
            }
        }
    }

    /// Cancel any in-flight discovery or switch
    ///
    /// Returns `true` if an operation was cancelled. The committed selection is
    /// kept.
    pub fn abort(&self) -> bool {
        let cancelled = self.state.send_if_modified(|state| {
            if state.phase == Phase::Idle {
                return false;
            }
            state.finish();
            true
        });
        if cancelled {
            tracing::debug!("Audio device operation aborted");
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::AudioBridge;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeBridge {
        direct_switch: bool,
        hang_on_switch: bool,
        discovery_calls: AtomicUsize,
        discovery_gate: Option<Notify>,
        discovery_started: Notify,
        switch_started: Notify,
        confirm: Notify,
        changes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AudioBridge for FakeBridge {
        fn supports_output_switch(&self) -> bool {
            self.direct_switch
        }

        async fn init_discovery(&self) -> Vec<DeviceDescriptor> {
            self.discovery_calls.fetch_add(1, Ordering::SeqCst);
            self.discovery_started.notify_one();
            if let Some(gate) = &self.discovery_gate {
                gate.notified().await;
            }
            vec![
                DeviceDescriptor::new("speaker", "speaker", DeviceKind::AudioOutput),
                DeviceDescriptor::new("bt", "bluetooth", DeviceKind::AudioOutput),
            ]
        }

        async fn switch_output(&self, _key: &str) -> Result<()> {
            self.switch_started.notify_one();
            if self.hang_on_switch {
                std::future::pending::<()>().await;
            }
            self.confirm.notified().await;
            Ok(())
        }

        async fn notify_device_change(&self, key: &str) {
            self.changes.lock().unwrap().push(key.to_string());
        }

        async fn request_focus(&self) {}

        async fn activate_output(&self) {}

        async fn release_focus(&self) {}
    }

    fn manager(bridge: Arc<FakeBridge>) -> AudioDeviceManager {
        AudioDeviceManager::new(
            AudioRouting::Present(bridge),
            Duration::from_secs(5),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn test_init_populates_devices() {
        let bridge = Arc::new(FakeBridge::default());
        let manager = manager(bridge.clone());

        assert_eq!(manager.init().await, InitOutcome::Discovered(2));
        let state = manager.state();
        assert_eq!(state.devices.len(), 2);
        assert!(!state.busy);
        assert_eq!(state.operation(), Operation::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_init_runs_one_discovery() {
        let bridge = Arc::new(FakeBridge {
            discovery_gate: Some(Notify::new()),
            ..Default::default()
        });
        let manager = manager(bridge.clone());

        let (first, second, _) = tokio::join!(manager.init(), manager.init(), async {
            if let Some(gate) = &bridge.discovery_gate {
                gate.notify_one();
            }
        });

        assert_eq!(first, InitOutcome::Discovered(2));
        assert_eq!(second, InitOutcome::Coalesced);
        assert_eq!(bridge.discovery_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_init_without_bridge_leaves_list_empty() {
        let manager = AudioDeviceManager::new(
            AudioRouting::Absent,
            Duration::from_secs(5),
            EventBus::new(),
        );

        assert_eq!(manager.init().await, InitOutcome::Discovered(0));
        assert!(manager.state().devices.is_empty());
        assert_eq!(manager.select("speaker").await.unwrap(), SelectOutcome::Unsupported);
    }

    #[tokio::test]
    async fn test_select_commits_on_confirmation() {
        let bridge = Arc::new(FakeBridge {
            direct_switch: true,
            ..Default::default()
        });
        let manager = manager(bridge.clone());
        let mut events = manager.events.subscribe();
        manager.init().await;

        bridge.confirm.notify_one();
        assert_eq!(manager.select("bt").await.unwrap(), SelectOutcome::Switched);

        let state = manager.state();
        assert_eq!(state.selected.map(|d| d.icon), Some("bluetooth".to_string()));
        assert!(!state.busy);
        assert_eq!(*bridge.changes.lock().unwrap(), vec!["bt".to_string()]);
        assert!(events
            .drain()
            .contains(&SessionEvent::OutputSwitched("bt".to_string())));
    }

    #[tokio::test]
    async fn test_select_while_busy_is_rejected() {
        let bridge = Arc::new(FakeBridge {
            direct_switch: true,
            ..Default::default()
        });
        let manager = Arc::new(manager(bridge.clone()));

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.select("speaker").await })
        };
        bridge.switch_started.notified().await;

        assert_eq!(manager.select("bt").await.unwrap(), SelectOutcome::Rejected);
        assert_eq!(manager.init().await, InitOutcome::Coalesced);

        bridge.confirm.notify_one();
        assert_eq!(pending.await.unwrap().unwrap(), SelectOutcome::Switched);
        assert_eq!(manager.state().selected.map(|d| d.key), Some("speaker".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_times_out_without_confirmation() {
        let bridge = Arc::new(FakeBridge {
            direct_switch: true,
            hang_on_switch: true,
            ..Default::default()
        });
        let manager = manager(bridge);

        let err = manager.select("bt").await.unwrap_err();
        assert!(matches!(err, SessionError::SwitchTimedOut));

        let state = manager.state();
        assert!(state.selected.is_none());
        assert!(!state.busy);
    }

    #[tokio::test]
    async fn test_abort_discards_late_confirmation() {
        let bridge = Arc::new(FakeBridge {
            direct_switch: true,
            ..Default::default()
        });
        let manager = Arc::new(manager(bridge.clone()));

        bridge.confirm.notify_one();
        manager.select("speaker").await.unwrap();
        // consume the permit left by the first switch
        bridge.switch_started.notified().await;

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.select("bt").await })
        };
        bridge.switch_started.notified().await;

        assert!(manager.abort());
        assert!(!manager.state().busy);
        bridge.confirm.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), SelectOutcome::Aborted);
        let state = manager.state();
        assert_eq!(state.selected.clone().map(|d| d.key), Some("speaker".to_string()));
        assert_eq!(state.operation(), Operation::Idle);
    }

    #[tokio::test]
    async fn test_abort_discards_late_discovery() {
        let bridge = Arc::new(FakeBridge {
            discovery_gate: Some(Notify::new()),
            ..Default::default()
        });
        let manager = Arc::new(manager(bridge.clone()));

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.init().await })
        };
        bridge.discovery_started.notified().await;
        assert!(manager.state().busy);

        assert!(manager.abort());
        if let Some(gate) = &bridge.discovery_gate {
            gate.notify_one();
        }

        assert_eq!(pending.await.unwrap(), InitOutcome::Aborted);
        let state = manager.state();
        assert!(state.devices.is_empty());
        assert!(!state.busy);
        assert_eq!(state.operation(), Operation::Idle);
    }

    #[tokio::test]
    async fn test_abort_when_idle_is_harmless() {
        let manager = manager(Arc::new(FakeBridge::default()));
        assert!(!manager.abort());
        assert_eq!(manager.state(), DeviceSelectionState::default());
    }

    #[tokio::test]
    async fn test_dropped_select_returns_to_idle() {
        let bridge = Arc::new(FakeBridge {
            direct_switch: true,
            hang_on_switch: true,
            ..Default::default()
        });
        let manager = Arc::new(manager(bridge.clone()));

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.select("bt").await })
        };
        bridge.switch_started.notified().await;
        assert!(manager.state().busy);

        pending.abort();
        let _ = pending.await;
        assert!(!manager.state().busy);
    }
}
