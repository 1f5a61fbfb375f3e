//! Playback clock deciding how far into the session the worker may deliver
//!
//! The clock never looks at the data itself. It answers one question per tick:
//! "up to which [`Boundary`] is the session considered to have happened?"

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Wall clock seam so tests can drive time by hand
pub trait TimeSource: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualTimeSource {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// How the boundary is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Boundary follows `now - delay`
    Live,
    /// Boundary is the first `n` records of the stream
    Cursor(usize),
}

/// Delivery limit for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Every record with a timestamp at or before this instant
    Time(DateTime<Utc>),
    /// The first `n` records
    Index(usize),
}

/// Delay, cursor and pause state for a playback session
#[derive(Debug, Clone)]
pub struct SyncClock {
    time: Arc<dyn TimeSource>,
    delay: TimeDelta,
    mode: ClockMode,
    paused_at: Option<DateTime<Utc>>,
}

impl SyncClock {
    pub fn new(time: Arc<dyn TimeSource>, delay: Duration) -> Self {
        let mut clock = Self {
            time,
            delay: TimeDelta::zero(),
            mode: ClockMode::Live,
            paused_at: None,
        };
        clock.set_delay(delay);
        clock
    }

    /// Clock on the system time source
    pub fn system(delay: Duration) -> Self {
        Self::new(Arc::new(SystemTimeSource), delay)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    pub fn delay(&self) -> TimeDelta {
        self.delay
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Change the lag behind real time; applies from the next boundary
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
    }

    /// Freeze the boundary at its current value
    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(self.time.now());
        }
    }

    /// Unfreeze; playback continues from where it stopped
    pub fn resume(&mut self) {
        let Some(paused_at) = self.paused_at.take() else {
            return;
        };
        if self.mode == ClockMode::Live {
            let paused_for = (self.time.now() - paused_at).max(TimeDelta::zero());
            self.delay = self.delay.checked_add(&paused_for).unwrap_or(TimeDelta::MAX);
        }
    }

    /// Scrub to an explicit record count
    pub fn seek_cursor(&mut self, count: usize) {
        self.mode = ClockMode::Cursor(count);
    }

    /// Return to delay-driven playback
    pub fn follow_live(&mut self) {
        self.mode = ClockMode::Live;
    }

    /// Set the delay so that the live boundary lands on `instant`
    ///
    /// Instants in the future clamp the delay to zero.
    pub fn seek_to_time(&mut self, instant: DateTime<Utc>) {
        let reference = self.reference();
        self.delay = (reference - instant).max(TimeDelta::zero());
        self.mode = ClockMode::Live;
    }

    pub fn boundary(&self) -> Boundary {
        match self.mode {
            ClockMode::Cursor(count) => Boundary::Index(count),
            ClockMode::Live => Boundary::Time(
                self.reference()
                    .checked_sub_signed(self.delay)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
            ),
        }
    }

    fn reference(&self) -> DateTime<Utc> {
        self.paused_at.unwrap_or_else(|| self.time.now())
    }
}
