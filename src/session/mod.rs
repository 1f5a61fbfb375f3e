//! Session capture, import, replay and live sources
//!
//! A session capture is a directory with two plain-text files:
//!
//! - `subscribe.txt`: the initial snapshot, one full payload per topic keyed by
//!   topic name
//! - `live.txt`: the delta log, one JSON-encoded [`RawDataPoint`](crate::types::RawDataPoint)
//!   per line in global timestamp order
//!
//! # Features
//!
//! - Import completed sessions from the static archive ([`DataImporter`])
//! - Replay captures in bounded chunks ([`ReplaySource`])
//! - Stream live sessions while appending to a capture ([`LiveClient`], [`LiveSource`])
//! - A single [`SessionSource`] contract for the dispatch worker

pub mod feed;
pub mod importer;
pub mod live;
pub mod player;
pub mod recorder;
pub mod types;

pub use importer::{DataImporter, FeedTransport, ImportedSession, MeetingsIndex, ReqwestTransport};
pub use live::{LiveClient, Stamper};
pub use player::{LiveSource, MemorySource, ReplaySource, SessionSource};
pub use recorder::{write_capture, CaptureWriter};
pub use types::{list_captures, CapturePaths, CaptureSummary, InitialSnapshot, SourceKind};
