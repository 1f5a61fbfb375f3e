//! Backend module: the dispatch thread and its control surface
//!
//! All topic state is written on one dedicated thread. Consumers talk to it
//! through crossbeam channels and read state through a [`RegistryView`].
//! Clock controls (delay, pause, seek) go through a shared latest-wins cell
//! instead of the channel, so a busy worker never loses one.
//!
//! # Architecture
//!
//! - [`BackendCommand`] - Session changes and requests queued for the worker
//! - [`PendingControl`] - Clock changes the worker picks up on its next tick
//! - [`BackendMessage`] - Notifications from the worker (progress, rewinds, errors)
//! - [`ControlHandle`] - Consumer-side handle for sending commands and receiving messages
//! - [`TimingBackend`] - Owns the worker until it is run on its thread
//!
//! # Components
//!
//! - [`SyncClock`] - Decides how far into the session the worker may deliver
//! - [`DispatchWorker`] - The tick loop applying points to the topic registry
//!
//! # Example
//!
//! ```ignore
//! use livetiming_rs::backend::TimingBackend;
//! use livetiming_rs::config::AppConfig;
//!
//! let source = ReplaySource::open(paths, 4096)?;
//! let (backend, control) = TimingBackend::new(&AppConfig::default(), Box::new(source));
//! let handle = backend.spawn()?;
//!
//! control.set_delay(Duration::from_secs(30));
//! let weather = control.view().weather_data();
//! ```

pub mod clock;
pub mod control;
pub mod worker;

pub use clock::{Boundary, ClockMode, ManualTimeSource, SyncClock, SystemTimeSource, TimeSource};
pub use control::{PendingControl, Position, SharedControls};
pub use worker::{DispatchSettings, DispatchStats, DispatchWorker};

use crate::config::AppConfig;
use crate::error::Result;
use crate::processor::{RegistryView, TopicRegistry};
use crate::session::SessionSource;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Message sent from a consumer to the worker
#[derive(Debug)]
pub enum BackendCommand {
    /// Switch to another session source (live or replay)
    LoadSession(Box<dyn SessionSource>),
    /// Request current statistics
    RequestStats,
    /// Shutdown the worker
    Shutdown,
}

/// Message sent from the worker to consumers
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Delivery state changed
    Progress {
        delivered: usize,
        available: usize,
        boundary: Boundary,
    },
    /// Topics were reset to the initial snapshot and replayed to `target`
    Rewound { target: usize },
    /// A backlog over the threshold was delivered in one tick
    CatchUp { backlog: usize },
    /// Every point the source will ever produce has been delivered
    SourceFinished,
    /// Statistics update
    Stats(DispatchStats),
    /// Non-fatal source error
    Error(String),
    /// Worker is shutting down
    Shutdown,
}

/// Consumer-side handle; cheap to clone and safe to use from any thread
///
/// Every control operation returns immediately. Clock controls return `false`
/// only once the worker is gone; queued commands also return `false` when the
/// command queue is full.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    receiver: Receiver<BackendMessage>,
    command_sender: Sender<BackendCommand>,
    controls: Weak<Mutex<PendingControl>>,
    running: Arc<AtomicBool>,
    view: RegistryView,
}

impl ControlHandle {
    pub(crate) fn new(
        receiver: Receiver<BackendMessage>,
        command_sender: Sender<BackendCommand>,
        controls: &SharedControls,
        running: Arc<AtomicBool>,
        view: RegistryView,
    ) -> Self {
        Self {
            receiver,
            command_sender,
            controls: Arc::downgrade(controls),
            running,
            view,
        }
    }

    /// Read access to every topic's latest state
    pub fn view(&self) -> &RegistryView {
        &self.view
    }

    /// Try to receive a message without blocking
    pub fn try_recv(&self) -> Option<BackendMessage> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for a message; `None` on timeout or after the worker is gone
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BackendMessage> {
        match self.receiver.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Receive all pending messages
    pub fn drain(&self) -> Vec<BackendMessage> {
        self.receiver.try_iter().collect()
    }

    /// Queue a command without blocking
    pub fn send_command(&self, cmd: BackendCommand) -> bool {
        self.command_sender.try_send(cmd).is_ok()
    }

    /// Record a clock change for the worker's next tick
    fn update_controls(&self, update: impl FnOnce(&mut PendingControl)) -> bool {
        match self.controls.upgrade() {
            Some(controls) => {
                update(&mut controls.lock());
                true
            }
            None => false,
        }
    }

    pub fn set_delay(&self, delay: Duration) -> bool {
        self.update_controls(|c| c.set_delay(delay))
    }

    pub fn pause(&self) -> bool {
        self.update_controls(PendingControl::pause)
    }

    pub fn resume(&self) -> bool {
        self.update_controls(PendingControl::resume)
    }

    pub fn seek_cursor(&self, count: usize) -> bool {
        self.update_controls(|c| c.seek_cursor(count))
    }

    pub fn seek_time(&self, instant: DateTime<Utc>) -> bool {
        self.update_controls(|c| c.seek_time(instant))
    }

    pub fn follow_live(&self) -> bool {
        self.update_controls(PendingControl::follow_live)
    }

    /// Switch the worker to another session
    ///
    /// Clock changes not yet picked up were meant for the old session and are
    /// discarded.
    pub fn load_session(&self, source: Box<dyn SessionSource>) -> bool {
        self.update_controls(|c| *c = PendingControl::default());
        self.send_command(BackendCommand::LoadSession(source))
    }

    pub fn request_stats(&self) -> bool {
        self.send_command(BackendCommand::RequestStats)
    }

    /// Request shutdown; the worker stops before its next tick even when the
    /// command queue is full
    pub fn shutdown(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.command_sender.try_send(BackendCommand::Shutdown);
        self.controls.strong_count() > 0
    }
}

/// The dispatch backend before it is started on its thread
pub struct TimingBackend {
    source: Box<dyn SessionSource>,
    registry: TopicRegistry,
    settings: DispatchSettings,
    time: Arc<dyn TimeSource>,
    /// Clock controls written by consumers
    controls: SharedControls,
    /// Receiver for commands from consumers
    command_receiver: Receiver<BackendCommand>,
    /// Sender for messages to consumers
    message_sender: Sender<BackendMessage>,
    /// Running flag
    running: Arc<AtomicBool>,
}

impl TimingBackend {
    /// Create a backend for `source` with its communication channels
    pub fn new(config: &AppConfig, source: Box<dyn SessionSource>) -> (Self, ControlHandle) {
        let (cmd_tx, cmd_rx) = bounded(config.channels.command_buffer.max(1));
        let (msg_tx, msg_rx) = bounded(config.channels.message_buffer.max(1));
        let registry = TopicRegistry::new();
        let controls = SharedControls::default();
        let running = Arc::new(AtomicBool::new(true));

        let control = ControlHandle::new(msg_rx, cmd_tx, &controls, running.clone(), registry.view());

        let backend = Self {
            source,
            registry,
            settings: DispatchSettings::from(&config.playback),
            time: Arc::new(SystemTimeSource),
            controls,
            command_receiver: cmd_rx,
            message_sender: msg_tx,
            running,
        };

        (backend, control)
    }

    /// Drive the clock from another time source
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn view(&self) -> RegistryView {
        self.registry.view()
    }

    /// Get a handle to stop the backend
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Build the worker without starting a thread, for stepping ticks by hand
    pub fn into_worker(self) -> DispatchWorker {
        let clock = SyncClock::new(self.time, self.settings.delay);
        DispatchWorker::new(
            self.source,
            self.registry,
            clock,
            self.settings,
            self.controls,
            self.command_receiver,
            self.message_sender,
            self.running,
        )
    }

    /// Run the dispatch loop on the calling thread
    pub fn run(self) {
        self.into_worker().run();
    }

    /// Run the dispatch loop on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name("livetiming-dispatch".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }
}
