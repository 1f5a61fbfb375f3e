//! # livetiming-rs: live-timing ingestion, replay and state merge
//!
//! Ingests a motorsport live-timing feed (streamed live or imported from the
//! static archive), orders it into a single timeline, and folds each topic's
//! partial updates into a typed "latest" state that any number of readers can
//! sample while one worker thread writes.
//!
//! ## Architecture
//!
//! - **Session**: captures, archive import, live client and the [`SessionSource`](session::SessionSource) contract
//! - **Backend**: the dispatch thread, its playback clock and the control surface
//! - **Processor**: one typed merge engine per topic behind a closed registry
//! - **Merge**: the structural deep merge shared by every topic schema
//! - **Communication**: crossbeam channels between the worker and its consumers
//!
//! ## Configuration
//!
//! Settings are read from `livetiming-rs/config.toml` under the platform config
//! directory; captures default to `livetiming-rs/captures` under the data directory.
//!
//! ## Example
//!
//! ```ignore
//! use livetiming_rs::{
//!     backend::TimingBackend,
//!     config::AppConfig,
//!     session::{CapturePaths, ReplaySource},
//! };
//!
//! let config = AppConfig::load_or_default();
//! let paths = CapturePaths::in_dir(config.data_dir()?.join("2024_Sakhir_Race"));
//! let source = ReplaySource::open(paths, config.playback.replay_chunk_size)?;
//!
//! let (backend, control) = TimingBackend::new(&config, Box::new(source));
//! let worker = backend.spawn()?;
//!
//! let timing = control.view().timing_data();
//! control.seek_cursor(1_000);
//! control.shutdown();
//! worker.join().ok();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod merge;
pub mod processor;
pub mod session;
pub mod topics;
pub mod types;

// Re-export commonly used types
pub use backend::{BackendCommand, BackendMessage, ControlHandle, TimingBackend};
pub use config::AppConfig;
pub use error::{LiveTimingError, Result};
pub use processor::{Latest, RegistryView, TopicRegistry};
pub use types::{RawDataPoint, Topic};
