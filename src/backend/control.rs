//! Pending clock controls shared between consumers and the worker
//!
//! Clock controls do not travel over the command channel. Each consumer call
//! overwrites the matching slot of a [`PendingControl`], and the worker takes
//! the whole cell at the start of its next tick, so the most recent request of
//! each kind always reaches the clock no matter how many were issued.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::clock::SyncClock;

/// Cell written by [`ControlHandle`](super::ControlHandle) and drained by the worker
pub type SharedControls = Arc<Mutex<PendingControl>>;

/// Requested playback position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// First `n` records
    Cursor(usize),
    /// Live boundary on an instant
    Time(DateTime<Utc>),
    /// Back to `now - delay`
    Live,
}

/// Clock changes requested since the last tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingControl {
    pub delay: Option<Duration>,
    /// `Some(true)` to pause, `Some(false)` to resume
    pub paused: Option<bool>,
    pub position: Option<Position>,
}

impl PendingControl {
    pub fn is_empty(&self) -> bool {
        self.delay.is_none() && self.paused.is_none() && self.position.is_none()
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = Some(delay);
        // A later delay overrides the delay an earlier time seek would set
        if matches!(self.position, Some(Position::Time(_))) {
            self.position = Some(Position::Live);
        }
    }

    pub fn pause(&mut self) {
        self.paused = Some(true);
    }

    pub fn resume(&mut self) {
        self.paused = Some(false);
    }

    pub fn seek_cursor(&mut self, count: usize) {
        self.position = Some(Position::Cursor(count));
    }

    pub fn seek_time(&mut self, instant: DateTime<Utc>) {
        self.position = Some(Position::Time(instant));
        self.delay = None;
    }

    pub fn follow_live(&mut self) {
        self.position = Some(Position::Live);
    }

    /// Apply to the clock: pause state, then delay, then position
    pub fn apply(self, clock: &mut SyncClock) {
        match self.paused {
            Some(true) => clock.pause(),
            Some(false) => clock.resume(),
            None => {}
        }
        if let Some(delay) = self.delay {
            clock.set_delay(delay);
        }
        match self.position {
            Some(Position::Cursor(count)) => clock.seek_cursor(count),
            Some(Position::Time(instant)) => clock.seek_to_time(instant),
            Some(Position::Live) => clock.follow_live(),
            None => {}
        }
    }
}
