//! Session bootstrap
//!
//! A [`Bootstrap`] is mounted with [`Bootstrap::activate`], which returns a
//! [`Session`]. The session connects signaling, and on the first rising edge
//! of the signaling readiness signal loads configuration and enters the room
//! concurrently. It is ready once signaling and configuration are both ready.
//! Room entry is not part of readiness.
//!
//! Teardown runs exactly once per session, whether through
//! [`Session::teardown`] or on drop, regardless of how far bootstrap got.

use crate::audio::AudioDeviceManager;
use crate::bridge::AudioRouting;
use crate::collaborators::Collaborators;
use crate::edge::RisingEdge;
use crate::error::{Result, SessionError};
use crate::events::{EventBus, EventReceiver, SessionEvent};
use crate::options::SessionOptions;
use crate::registry::ConfigRegistry;
use crate::types::BootstrapState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};

/// Furthest bootstrap stage reached by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    NotStarted,
    ConnectingSignaling,
    SignalingReady,
    LoadingConfigAndRoom,
    Ready,
    TornDown,
}

/// Mountable session bootstrap
pub struct Bootstrap {
    collaborators: Collaborators,
    registry: Arc<ConfigRegistry>,
    routing: AudioRouting,
    audio: Arc<AudioDeviceManager>,
    events: EventBus,
    route_activation_delay: Duration,
    release_timeout: Duration,
}

impl Bootstrap {
    pub fn new(collaborators: Collaborators, routing: AudioRouting, options: &SessionOptions) -> Self {
        let events = EventBus::new();
        let audio = Arc::new(AudioDeviceManager::new(
            routing.clone(),
            options.switch_timeout(),
            events.clone(),
        ));
        Self {
            collaborators,
            registry: Arc::new(ConfigRegistry::new()),
            routing,
            audio,
            events,
            route_activation_delay: options.route_activation_delay(),
            release_timeout: options.request_timeout(),
        }
    }

    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.registry
    }

    pub fn audio(&self) -> &Arc<AudioDeviceManager> {
        &self.audio
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Mount a new session and start connecting signaling
    ///
    /// Must be called within a Tokio runtime.
    pub fn activate(&self) -> Session {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            collaborators: self.collaborators.clone(),
            registry: self.registry.clone(),
            routing: self.routing.clone(),
            audio: self.audio.clone(),
            events: self.events.clone(),
            route_activation_delay: self.route_activation_delay,
            release_timeout: self.release_timeout,
            state: watch::Sender::new(BootstrapState::default()),
            phase: watch::Sender::new(BootstrapPhase::NotStarted),
            torn_down: AtomicBool::new(false),
            route_task: Mutex::new(None),
        });

        let driver = tokio::spawn(SessionInner::drive(inner.clone(), errors_tx));

        Session {
            inner,
            driver,
            errors_rx,
        }
    }
}

struct SessionInner {
    collaborators: Collaborators,
    registry: Arc<ConfigRegistry>,
    routing: AudioRouting,
    audio: Arc<AudioDeviceManager>,
    events: EventBus,
    route_activation_delay: Duration,
    release_timeout: Duration,
    state: watch::Sender<BootstrapState>,
    phase: watch::Sender<BootstrapPhase>,
    torn_down: AtomicBool,
    route_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn advance(&self, phase: BootstrapPhase) {
        self.phase.send_if_modified(|current| {
            if *current == BootstrapPhase::TornDown || *current == phase {
                return false;
            }
            tracing::debug!("Bootstrap phase {:?} -> {:?}", current, phase);
            *current = phase;
            true
        });
    }

    /// Apply a readiness change and announce the session once it becomes ready
    fn update(&self, modify: impl FnOnce(&mut BootstrapState)) {
        let mut became_ready = false;
        self.state.send_if_modified(|state| {
            if state.torn_down {
                return false;
            }
            let before = *state;
            modify(state);
            became_ready = state.ready() && !before.ready();
            *state != before
        });
        if became_ready {
            tracing::info!("Session ready");
            self.advance(BootstrapPhase::Ready);
            self.events.emit(SessionEvent::Ready);
        }
    }

    async fn drive(self: Arc<Self>, errors: mpsc::UnboundedSender<SessionError>) {
        let mut connected = self.collaborators.signaling.connected();
        let mut edge = RisingEdge::new();
        let mut tasks = JoinSet::new();

        self.advance(BootstrapPhase::ConnectingSignaling);
        let signaling = self.collaborators.signaling.clone();
        let connect_errors = errors.clone();
        tasks.spawn(async move {
            if let Err(e) = signaling.connect().await {
                tracing::error!("Signaling connection failed: {}", e);
                let _ = connect_errors.send(e);
            }
        });

        if self.routing.uses_focus_routing() {
            let routing = self.routing.clone();
            tasks.spawn(async move { routing.request_focus().await });
        }

        loop {
            let level = *connected.borrow_and_update();
            let previous = self.state.borrow().signaling_ready;
            if level != previous && !self.is_torn_down() {
                self.update(|state| state.signaling_ready = level);
                self.events.emit(SessionEvent::SignalingChanged(level));
            }

            if edge.update(level) && !self.is_torn_down() {
                self.advance(BootstrapPhase::SignalingReady);
                self.start_loading(&mut tasks, errors.clone());
            }

            if connected.changed().await.is_err() {
                tracing::debug!("Signaling readiness signal closed");
                break;
            }
        }

        while tasks.join_next().await.is_some() {}
    }

    fn start_loading(
        self: &Arc<Self>,
        tasks: &mut JoinSet<()>,
        errors: mpsc::UnboundedSender<SessionError>,
    ) {
        tracing::info!("Signaling ready, loading configuration and entering room");
        self.advance(BootstrapPhase::LoadingConfigAndRoom);

        let inner = self.clone();
        tasks.spawn(async move {
            let loaded = inner.collaborators.config.load_config().await.and_then(|config| {
                inner
                    .registry
                    .set_config_unless(config, || inner.is_torn_down())
            });
            match loaded {
                Ok(true) => inner.update(|state| state.config_ready = true),
                Ok(false) => {}
                Err(_) if inner.is_torn_down() => {}
                Err(e) => {
                    tracing::error!("Configuration load failed: {}", e);
                    let _ = errors.send(e);
                }
            }
        });

        let room = self.collaborators.room.clone();
        tasks.spawn(async move {
            match room.enter_room().await {
                Ok(()) => tracing::info!("Entered room"),
                Err(e) => tracing::error!("Room entry failed: {}", e),
            }
        });
    }

    /// Release everything; only the first call does any work
    ///
    /// The release calls run on their own task, so dropping the returned
    /// future part way does not skip the room exit.
    async fn shut_down(self: &Arc<Self>) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Tearing down session");

        self.state.send_replace(BootstrapState {
            torn_down: true,
            ..BootstrapState::default()
        });
        self.phase.send_replace(BootstrapPhase::TornDown);
        self.registry.reset();
        self.audio.abort();

        let inner = self.clone();
        let release = tokio::spawn(async move {
            if let Some(task) = inner.route_task.lock().await.take() {
                task.abort();
            }
            inner.collaborators.room.exit_room().await;

            if inner.routing.uses_focus_routing()
                && tokio::time::timeout(inner.release_timeout, inner.routing.release_focus())
                    .await
                    .is_err()
            {
                tracing::warn!("Audio focus release timed out");
            }
            inner.events.emit(SessionEvent::TornDown);
        });

        if let Err(e) = release.await {
            tracing::error!("Session release task failed: {}", e);
        }
    }
}

/// A mounted bootstrap
pub struct Session {
    inner: Arc<SessionInner>,
    driver: JoinHandle<()>,
    errors_rx: mpsc::UnboundedReceiver<SessionError>,
}

impl Session {
    pub fn state(&self) -> BootstrapState {
        *self.inner.state.borrow()
    }

    /// Signaling and configuration are both ready
    pub fn ready(&self) -> bool {
        self.state().ready()
    }

    pub fn phase(&self) -> BootstrapPhase {
        *self.inner.phase.borrow()
    }

    /// Watch readiness changes
    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.inner.state.subscribe()
    }

    pub fn events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.inner.registry
    }

    pub fn audio(&self) -> &Arc<AudioDeviceManager> {
        &self.inner.audio
    }

    /// Wait until the session is ready
    ///
    /// Signaling and configuration failures are returned as reported by the
    /// collaborator. Returns [`SessionError::ConnectionClosed`] if the session
    /// is torn down first.
    pub async fn wait_ready(&mut self) -> Result<()> {
        let mut state = self.inner.state.subscribe();
        tokio::select! {
            biased;
            Some(e) = self.errors_rx.recv() => Err(e),
            ready = async {
                state
                    .wait_for(|s| s.ready() || s.torn_down)
                    .await
                    .map(|s| s.ready())
            } => match ready {
                Ok(true) => Ok(()),
                _ => Err(SessionError::ConnectionClosed),
            },
        }
    }

    /// The media transport has chosen its audio route
    ///
    /// On platforms routed through audio focus, the output is activated after
    /// a short delay so the platform's own negotiation settles first.
    pub async fn on_transport_audio_ready(&self) {
        if !self.inner.routing.uses_focus_routing() || self.inner.is_torn_down() {
            return;
        }

        let inner = self.inner.clone();
        let delay = self.inner.route_activation_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.is_torn_down() {
                tracing::debug!("Activating audio output route");
                inner.routing.activate_output().await;
            }
        });

        if let Some(previous) = self.inner.route_task.lock().await.replace(task) {
            previous.abort();
        }
    }

    /// Unmount the session, releasing room and audio resources
    pub async fn teardown(self) {
        self.driver.abort();
        self.inner.shut_down().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
        if self.inner.is_torn_down() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = self.inner.clone();
                handle.spawn(async move { inner.shut_down().await });
            }
            Err(_) => tracing::warn!("Session dropped outside a runtime; room exit skipped"),
        }
    }
}
