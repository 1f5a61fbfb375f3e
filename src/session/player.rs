//! Session sources: the ordered point sequences the dispatch worker consumes
//!
//! Every source exposes the same contract: an append-only, indexable sequence
//! of [`RawDataPoint`]s in delivery order plus the session's initial snapshot.
//! Sources never reorder what they hold.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, TryRecvError};
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::error::{Result, ResultExt};
use crate::types::RawDataPoint;

use super::recorder::CaptureWriter;
use super::types::{CapturePaths, InitialSnapshot, SourceKind};

/// An ordered sequence of data points for one session
pub trait SessionSource: Send + std::fmt::Debug {
    /// Pull newly available points into the buffer, returning how many were added
    fn poll(&mut self) -> Result<usize>;

    /// Points buffered so far
    fn available(&self) -> usize;

    /// Point at `index` in delivery order
    fn get(&self, index: usize) -> Option<&RawDataPoint>;

    /// No further points will ever arrive
    fn is_finished(&self) -> bool;

    fn initial_snapshot(&self) -> &InitialSnapshot;

    fn kind(&self) -> SourceKind;

    /// Poll until at least `count` points are buffered or the source runs dry
    fn ensure_loaded(&mut self, count: usize) -> Result<()> {
        while self.available() < count && !self.is_finished() {
            if self.poll()? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Poll until a buffered point lies past `boundary` or the source runs dry
    fn load_until(&mut self, boundary: DateTime<Utc>) -> Result<()> {
        loop {
            let last = self.available().checked_sub(1).and_then(|i| self.get(i));
            if last.is_some_and(|p| p.timestamp > boundary) || self.is_finished() {
                return Ok(());
            }
            if self.poll()? == 0 {
                return Ok(());
            }
        }
    }

    fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.get(0).map(|p| p.timestamp)
    }
}

/// Points held in memory; used for tests and for sessions imported without a capture
#[derive(Debug, Default)]
pub struct MemorySource {
    points: Vec<RawDataPoint>,
    snapshot: InitialSnapshot,
}

impl MemorySource {
    pub fn new(points: Vec<RawDataPoint>, snapshot: InitialSnapshot) -> Self {
        Self { points, snapshot }
    }
}

impl SessionSource for MemorySource {
    fn poll(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn available(&self) -> usize {
        self.points.len()
    }

    fn get(&self, index: usize) -> Option<&RawDataPoint> {
        self.points.get(index)
    }

    fn is_finished(&self) -> bool {
        true
    }

    fn initial_snapshot(&self) -> &InitialSnapshot {
        &self.snapshot
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Memory
    }
}

/// Sequential reader over a captured delta log
///
/// Reads at most `chunk_size` records per poll. In follow mode the reader
/// keeps waiting at end of file for a concurrent writer, and holds back an
/// unterminated final line until its newline arrives.
#[derive(Debug)]
pub struct ReplaySource {
    paths: CapturePaths,
    reader: BufReader<File>,
    pending: Vec<u8>,
    points: Vec<RawDataPoint>,
    snapshot: InitialSnapshot,
    chunk_size: usize,
    line_number: usize,
    malformed: usize,
    eof: bool,
    follow: bool,
}

impl ReplaySource {
    /// Open a capture directory
    pub fn open(paths: CapturePaths, chunk_size: usize) -> Result<Self> {
        let file = File::open(&paths.live)
            .with_context(|| format!("Opening {}", paths.live.display()))?;
        let snapshot = if paths.subscribe.is_file() {
            InitialSnapshot::load(&paths.subscribe)?
        } else {
            tracing::warn!(path = %paths.subscribe.display(), "No initial snapshot, topics start empty");
            InitialSnapshot::new()
        };
        tracing::info!(dir = %paths.dir.display(), "Opened capture for replay");
        Ok(Self {
            paths,
            reader: BufReader::new(file),
            pending: Vec::new(),
            points: Vec::new(),
            snapshot,
            chunk_size: chunk_size.max(1),
            line_number: 0,
            malformed: 0,
            eof: false,
            follow: false,
        })
    }

    /// Keep tailing the delta log after reaching its end
    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn paths(&self) -> &CapturePaths {
        &self.paths
    }

    /// Lines skipped because they could not be decoded
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// Decode the buffered line, if any; returns whether a point was added
    fn take_pending(&mut self) -> bool {
        let line = std::mem::take(&mut self.pending);
        let line = line.trim_ascii();
        if line.is_empty() {
            return false;
        }
        self.line_number += 1;
        match serde_json::from_slice::<RawDataPoint>(line) {
            Ok(point) => {
                self.points.push(point);
                true
            }
            Err(e) => {
                self.malformed += 1;
                tracing::warn!(line = self.line_number, error = %e, "Skipping malformed capture record");
                false
            }
        }
    }
}

impl SessionSource for ReplaySource {
    fn poll(&mut self) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let mut added = 0;
        while added < self.chunk_size {
            let read = self.reader.read_until(b'\n', &mut self.pending)?;
            if read == 0 {
                if !self.follow {
                    // Unterminated final record
                    if self.take_pending() {
                        added += 1;
                    }
                    self.eof = true;
                    tracing::debug!(records = self.points.len(), "Reached end of capture");
                }
                break;
            }
            if self.pending.last() != Some(&b'\n') {
                continue;
            }
            if self.take_pending() {
                added += 1;
            }
        }
        Ok(added)
    }

    fn available(&self) -> usize {
        self.points.len()
    }

    fn get(&self, index: usize) -> Option<&RawDataPoint> {
        self.points.get(index)
    }

    fn is_finished(&self) -> bool {
        self.eof
    }

    fn initial_snapshot(&self) -> &InitialSnapshot {
        &self.snapshot
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Replay
    }
}

/// Points arriving from the live feed client
///
/// Each point is appended to the capture (when one is attached) before it
/// becomes visible to [`SessionSource::get`].
#[derive(Debug)]
pub struct LiveSource {
    receiver: Receiver<RawDataPoint>,
    writer: Option<CaptureWriter>,
    points: Vec<RawDataPoint>,
    snapshot: InitialSnapshot,
    max_drain: usize,
    disconnected: bool,
}

impl LiveSource {
    pub fn new(receiver: Receiver<RawDataPoint>, snapshot: InitialSnapshot) -> Self {
        Self {
            receiver,
            writer: None,
            points: Vec::new(),
            snapshot,
            max_drain: 4096,
            disconnected: false,
        }
    }

    /// Append every received point to a capture
    pub fn with_capture(mut self, writer: CaptureWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn capture(&self) -> Option<&CaptureWriter> {
        self.writer.as_ref()
    }
}

impl SessionSource for LiveSource {
    fn poll(&mut self) -> Result<usize> {
        let mut added = 0;
        while added < self.max_drain {
            match self.receiver.try_recv() {
                Ok(point) => {
                    if let Some(writer) = self.writer.as_mut() {
                        if let Err(e) = writer.append(&point) {
                            tracing::error!(error = %e, "Failed to append to capture, continuing without it");
                            self.writer = None;
                        }
                    }
                    self.points.push(point);
                    added += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        tracing::info!(received = self.points.len(), "Live feed closed");
                    }
                    self.disconnected = true;
                    break;
                }
            }
        }
        Ok(added)
    }

    fn available(&self) -> usize {
        self.points.len()
    }

    fn get(&self, index: usize) -> Option<&RawDataPoint> {
        self.points.get(index)
    }

    fn is_finished(&self) -> bool {
        self.disconnected
    }

    fn initial_snapshot(&self) -> &InitialSnapshot {
        &self.snapshot
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }
}
