//! Dispatch worker thread
//!
//! The worker is the only writer of topic state. Each tick it:
//!
//! - **Processes commands**: session changes and stats requests, then the
//!   pending clock controls (delay, pause/resume, seek)
//! - **Polls the source**: pulls newly captured or received points
//! - **Resolves the boundary**: asks the [`SyncClock`] how far the session has progressed
//! - **Delivers**: applies due points to the [`TopicRegistry`] in stream order
//!
//! # Catch-up and rewind
//!
//! Under normal playback at most `max_points_per_tick` points are delivered per
//! tick. When the due backlog exceeds `catch_up_threshold` the whole backlog is
//! delivered in one tick instead. A boundary behind the delivered pointer resets
//! every topic to the initial snapshot and replays forward to the boundary, since
//! merges cannot be undone.

use crate::backend::clock::{Boundary, ClockMode, SyncClock};
use crate::backend::control::SharedControls;
use crate::backend::{BackendCommand, BackendMessage};
use crate::config::PlaybackConfig;
use crate::error::{LiveTimingError, Result};
use crate::processor::TopicRegistry;
use crate::session::SessionSource;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tick timing and delivery limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub tick_interval: Duration,
    pub catch_up_threshold: usize,
    pub max_points_per_tick: usize,
    /// Delay restored when a live session is loaded
    pub delay: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

impl From<&PlaybackConfig> for DispatchSettings {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            catch_up_threshold: config.catch_up_threshold,
            max_points_per_tick: config.max_points_per_tick.max(1),
            delay: config.delay(),
        }
    }
}

/// Counters reported on request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub ticks: u64,
    /// Points applied, including re-deliveries after a rewind
    pub delivered_total: u64,
    pub rewinds: u64,
    pub catch_ups: u64,
    pub skipped_fields: u64,
    pub source_errors: u64,
    pub dropped_messages: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProgressKey {
    delivered: usize,
    available: usize,
    mode: ClockMode,
    paused: bool,
}

/// Single-writer dispatch loop
pub struct DispatchWorker {
    source: Box<dyn SessionSource>,
    registry: TopicRegistry,
    clock: SyncClock,
    settings: DispatchSettings,
    controls: SharedControls,
    command_rx: Receiver<BackendCommand>,
    message_tx: Sender<BackendMessage>,
    running: Arc<AtomicBool>,
    /// Points of the current stream already applied to the registry
    delivered: usize,
    last_progress: Option<ProgressKey>,
    finished_reported: bool,
    stats: DispatchStats,
}

impl DispatchWorker {
    pub fn new(
        source: Box<dyn SessionSource>,
        registry: TopicRegistry,
        clock: SyncClock,
        settings: DispatchSettings,
        controls: SharedControls,
        command_rx: Receiver<BackendCommand>,
        message_tx: Sender<BackendMessage>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let mut worker = Self {
            source,
            registry,
            clock,
            settings,
            controls,
            command_rx,
            message_tx,
            running,
            delivered: 0,
            last_progress: None,
            finished_reported: false,
            stats: DispatchStats::default(),
        };
        worker.start_session();
        worker
    }

    /// Run until shutdown is requested or every command sender is gone
    pub fn run(&mut self) {
        tracing::info!(source = self.source.kind().display_name(), "Dispatch worker started");

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.tick();
            self.rate_limit(started);
        }

        let _ = self
            .message_tx
            .send_timeout(BackendMessage::Shutdown, self.settings.tick_interval);
        tracing::info!(delivered = self.delivered, "Dispatch worker stopped");
    }

    /// One pass of the loop; returns the number of points applied
    pub fn tick(&mut self) -> usize {
        self.stats.ticks += 1;
        self.process_commands();
        if !self.running.load(Ordering::SeqCst) {
            return 0;
        }
        self.apply_controls();

        if let Err(e) = self.source.poll() {
            self.report_source_error(e);
        }

        let boundary = self.clock.boundary();
        let target = match self.resolve_target(boundary) {
            Ok(target) => target,
            Err(e) => {
                self.report_source_error(e);
                self.delivered
            }
        };

        let rewound = target < self.delivered;
        if rewound {
            self.rewind(target);
        }

        let backlog = target - self.delivered;
        let budget = match boundary {
            // Scrubbing always lands on the requested record
            Boundary::Index(_) => backlog,
            Boundary::Time(_) if rewound => backlog,
            Boundary::Time(_) if backlog > self.settings.catch_up_threshold => {
                tracing::info!(
                    from = self.delivered,
                    to = target,
                    backlog,
                    "Backlog over threshold, catching up"
                );
                self.stats.catch_ups += 1;
                self.try_send_message(BackendMessage::CatchUp { backlog });
                backlog
            }
            Boundary::Time(_) => backlog.min(self.settings.max_points_per_tick),
        };

        let applied = self.deliver(budget);
        self.report_progress(boundary);
        applied
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &SyncClock {
        &self.clock
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn source(&self) -> &dyn SessionSource {
        self.source.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Install the current source's snapshot and position the clock at its start
    fn start_session(&mut self) {
        self.registry.load_initial(self.source.initial_snapshot().topics());
        self.delivered = 0;
        self.last_progress = None;
        self.finished_reported = false;

        if self.source.kind().is_live() {
            self.clock.set_delay(self.settings.delay);
            self.clock.follow_live();
        } else {
            if let Err(e) = self.source.ensure_loaded(1) {
                self.report_source_error(e);
            }
            if let Some(first) = self.source.first_timestamp() {
                self.clock.seek_to_time(first);
            }
        }

        tracing::info!(
            source = self.source.kind().display_name(),
            snapshot_topics = self.source.initial_snapshot().topics().len(),
            "Session loaded"
        );
    }

    /// Process pending commands from consumers
    fn process_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::info!("Command channel disconnected, stopping worker");
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Take the clock changes requested since the last tick
    fn apply_controls(&mut self) {
        let pending = std::mem::take(&mut *self.controls.lock());
        if !pending.is_empty() {
            tracing::debug!(?pending, "Applying clock controls");
            pending.apply(&mut self.clock);
        }
    }

    fn handle_command(&mut self, cmd: BackendCommand) {
        match cmd {
            BackendCommand::LoadSession(source) => {
                self.source = source;
                self.start_session();
            }
            BackendCommand::RequestStats => {
                let mut stats = self.stats.clone();
                stats.skipped_fields = self.registry.skipped_fields();
                self.try_send_message(BackendMessage::Stats(stats));
            }
            BackendCommand::Shutdown => {
                tracing::info!("Shutdown requested");
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Stream index the boundary corresponds to
    fn resolve_target(&mut self, boundary: Boundary) -> Result<usize> {
        match boundary {
            Boundary::Index(count) => {
                self.source.ensure_loaded(count)?;
                Ok(count.min(self.source.available()))
            }
            Boundary::Time(limit) => {
                self.source.load_until(limit)?;
                let source = self.source.as_ref();
                let due = |index: usize| source.get(index).is_some_and(|p| p.timestamp <= limit);

                if self.delivered > 0 && !due(self.delivered - 1) {
                    // Boundary moved behind what was delivered
                    let (mut low, mut high) = (0, self.delivered);
                    while low < high {
                        let mid = low + (high - low) / 2;
                        if due(mid) {
                            low = mid + 1;
                        } else {
                            high = mid;
                        }
                    }
                    Ok(low)
                } else {
                    let mut index = self.delivered;
                    while due(index) {
                        index += 1;
                    }
                    Ok(index)
                }
            }
        }
    }

    /// Reset every topic to the initial snapshot so the stream can be replayed to `target`
    fn rewind(&mut self, target: usize) {
        tracing::info!(from = self.delivered, to = target, "Rewinding to initial snapshot");
        self.registry.reset();
        self.delivered = 0;
        self.finished_reported = false;
        self.stats.rewinds += 1;
        self.try_send_message(BackendMessage::Rewound { target });
    }

    fn deliver(&mut self, count: usize) -> usize {
        let end = self.delivered + count;
        let start = self.delivered;
        while self.delivered < end {
            let Some(point) = self.source.get(self.delivered) else {
                break;
            };
            let context = self.registry.apply(point);
            if !context.is_clean() {
                tracing::debug!(
                    topic = %point.topic,
                    index = self.delivered,
                    skipped = context.skipped().len(),
                    "Applied with skipped fields"
                );
            }
            self.delivered += 1;
        }
        let applied = self.delivered - start;
        self.stats.delivered_total += applied as u64;
        applied
    }

    fn report_progress(&mut self, boundary: Boundary) {
        let key = ProgressKey {
            delivered: self.delivered,
            available: self.source.available(),
            mode: self.clock.mode(),
            paused: self.clock.is_paused(),
        };
        if self.last_progress != Some(key) {
            self.last_progress = Some(key);
            self.try_send_message(BackendMessage::Progress {
                delivered: key.delivered,
                available: key.available,
                boundary,
            });
        }

        if !self.finished_reported && self.source.is_finished() && self.delivered == key.available {
            self.finished_reported = true;
            tracing::info!(delivered = self.delivered, "Source exhausted");
            self.try_send_message(BackendMessage::SourceFinished);
        }
    }

    fn report_source_error(&mut self, error: LiveTimingError) {
        tracing::warn!(error = %error, "Session source error");
        self.stats.source_errors += 1;
        self.try_send_message(BackendMessage::Error(error.to_string()));
    }

    /// Sleep out the remainder of the tick
    fn rate_limit(&self, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed < self.settings.tick_interval {
            std::thread::sleep(self.settings.tick_interval - elapsed);
        }
    }

    /// Send a message without blocking; count drops when the consumer is behind
    fn try_send_message(&mut self, msg: BackendMessage) {
        if self.message_tx.try_send(msg).is_err() {
            self.stats.dropped_messages += 1;
        }
    }
}
