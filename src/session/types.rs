//! Session capture types

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ResultExt};
use crate::types::Topic;

/// Delta log file name within a capture directory
pub const LIVE_FILE: &str = "live.txt";
/// Initial snapshot file name within a capture directory
pub const SUBSCRIBE_FILE: &str = "subscribe.txt";

/// Where a session's data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Reading a previously captured delta log
    #[default]
    Replay,
    /// Tailing the streaming feed
    Live,
    /// Points held in memory
    Memory,
}

impl SourceKind {
    /// Check if the source is the live feed
    pub fn is_live(&self) -> bool {
        matches!(self, SourceKind::Live)
    }

    /// Display name for the kind
    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::Replay => "Replay",
            SourceKind::Live => "Live",
            SourceKind::Memory => "Memory",
        }
    }
}

/// File locations for one captured session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePaths {
    pub dir: PathBuf,
    pub live: PathBuf,
    pub subscribe: PathBuf,
}

impl CapturePaths {
    /// Paths inside an existing capture directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            live: dir.join(LIVE_FILE),
            subscribe: dir.join(SUBSCRIBE_FILE),
            dir,
        }
    }

    /// Paths for a session under the data directory
    pub fn for_session(data_dir: &Path, year: i32, location: &str, session_name: &str) -> Self {
        Self::in_dir(data_dir.join(capture_dir_name(year, location, session_name)))
    }

    /// The first capture file that already exists, if any
    pub fn existing_file(&self) -> Option<&Path> {
        [&self.live, &self.subscribe]
            .into_iter()
            .find(|p| p.exists())
            .map(PathBuf::as_path)
    }

    /// Whether both files are present
    pub fn is_complete(&self) -> bool {
        self.live.is_file() && self.subscribe.is_file()
    }
}

/// `{year}_{location}_{session}` with spaces replaced by underscores
pub fn capture_dir_name(year: i32, location: &str, session_name: &str) -> String {
    format!("{}_{}_{}", year, location, session_name).replace(' ', "_")
}

/// Full-state payload per topic at session start
///
/// Stored as a JSON object keyed by topic wire name. Keys that are not known
/// topics are dropped on load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitialSnapshot {
    topics: BTreeMap<Topic, Value>,
}

impl InitialSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, topic: Topic, payload: Value) {
        self.topics.insert(topic, payload);
    }

    pub fn get(&self, topic: Topic) -> Option<&Value> {
        self.topics.get(&topic)
    }

    pub fn topics(&self) -> &BTreeMap<Topic, Value> {
        &self.topics
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Build from a `{ "<topic>": <payload>, ... }` document
    pub fn from_value(value: Value) -> Self {
        let mut snapshot = Self::new();
        let Value::Object(entries) = value else {
            tracing::warn!("Initial snapshot is not an object, ignoring it");
            return snapshot;
        };
        for (name, payload) in entries {
            match Topic::from_wire(&name) {
                Some(topic) => snapshot.insert(topic, payload),
                None => tracing::debug!(topic = %name, "Dropping unknown topic from snapshot"),
            }
        }
        snapshot
    }

    pub fn to_value(&self) -> Value {
        let entries: Map<String, Value> = self
            .topics
            .iter()
            .map(|(topic, payload)| (topic.wire_name().to_string(), payload.clone()))
            .collect();
        Value::Object(entries)
    }

    /// Load from a snapshot file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Reading snapshot {}", path.display()))?;
        let value: Value = serde_json::from_str(text.trim_start_matches('\u{feff}'))?;
        Ok(Self::from_value(value))
    }
}

/// A capture directory found under the data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Directory name, e.g. `2024_Sakhir_Race`
    pub name: String,
    pub paths: CapturePaths,
    /// Size of the delta log in bytes
    pub size: u64,
}

/// List capture directories that contain a delta log, sorted by name
pub fn list_captures(data_dir: &Path) -> Result<Vec<CaptureSummary>> {
    if !data_dir.exists() {
        return Ok(Vec::new());
    }
    let mut captures = Vec::new();
    for entry in fs::read_dir(data_dir)
        .with_context(|| format!("Listing {}", data_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let paths = CapturePaths::in_dir(entry.path());
        let Ok(meta) = fs::metadata(&paths.live) else {
            continue;
        };
        captures.push(CaptureSummary {
            name: entry.file_name().to_string_lossy().into_owned(),
            paths,
            size: meta.len(),
        });
    }
    captures.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(captures)
}
