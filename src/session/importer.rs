//! Import of completed sessions from the static feed archive
//!
//! Resolves a session through the yearly meetings index, downloads every topic
//! stream concurrently, anchors and merge-sorts the points and writes the
//! result as a capture.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{LiveTimingError, Result};
use crate::types::{RawDataPoint, SessionType, Topic};

use super::feed::{compute_anchor, merge_streams, parse_stream, stamp, FeedLine};
use super::recorder::write_capture;
use super::types::{CapturePaths, InitialSnapshot};

// ==================== Meetings index ====================

/// `{year}/Index.json`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeetingsIndex {
    #[serde(default)]
    pub year: i32,
    #[serde(default)]
    pub meetings: Vec<Meeting>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Meeting {
    pub key: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub official_name: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub country: Option<IndexCountry>,
    #[serde(default)]
    pub sessions: Vec<IndexSession>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexCountry {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexSession {
    pub key: i64,
    #[serde(rename = "Type", default)]
    pub session_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub gmt_offset: Option<String>,
    /// Archive path; absent until the session has completed
    #[serde(default)]
    pub path: Option<String>,
}

impl IndexSession {
    pub fn kind(&self) -> SessionType {
        SessionType::from_index_type(&self.session_type)
    }

    pub fn is_importable(&self) -> bool {
        self.path.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

impl MeetingsIndex {
    pub fn meeting(&self, key: i64) -> Result<&Meeting> {
        self.meetings
            .iter()
            .find(|m| m.key == key)
            .ok_or_else(|| LiveTimingError::NotFound(format!("Meeting with key {}", key)))
    }
}

impl Meeting {
    pub fn session(&self, key: i64) -> Result<&IndexSession> {
        self.sessions
            .iter()
            .find(|s| s.key == key)
            .ok_or_else(|| LiveTimingError::NotFound(format!("Session with key {}", key)))
    }
}

// ==================== Transport ====================

/// Fetches feed documents as text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String>;
}

/// HTTP transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("livetiming-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedTransport for ReqwestTransport {
    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

// ==================== Importer ====================

/// A fetched, anchored and ordered session
#[derive(Debug, Clone)]
pub struct ImportedSession {
    pub anchor: DateTime<Utc>,
    pub snapshot: InitialSnapshot,
    pub points: Vec<RawDataPoint>,
}

pub struct DataImporter<T> {
    transport: T,
    static_base: Url,
    data_dir: PathBuf,
}

impl<T: FeedTransport> DataImporter<T> {
    pub fn new(transport: T, static_base_url: &str, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut static_base = Url::parse(static_base_url)?;
        if !static_base.path().ends_with('/') {
            let path = format!("{}/", static_base.path());
            static_base.set_path(&path);
        }
        Ok(Self {
            transport,
            static_base,
            data_dir: data_dir.into(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch the meetings index for a year
    pub async fn meetings(&self, year: i32) -> Result<MeetingsIndex> {
        let url = self.static_base.join(&format!("{}/Index.json", year))?;
        tracing::debug!(%url, "Fetching meetings index");
        let body = self.transport.get_text(url.as_str()).await?;
        Ok(serde_json::from_str(body.trim_start_matches('\u{feff}'))?)
    }

    /// Capture location for a session
    pub fn capture_paths(&self, year: i32, meeting: &Meeting, session: &IndexSession) -> CapturePaths {
        CapturePaths::for_session(&self.data_dir, year, &meeting.location, &session.name)
    }

    /// Resolve keys, download and write a session capture
    pub async fn import_session(&self, year: i32, meeting_key: i64, session_key: i64) -> Result<CapturePaths> {
        let index = self.meetings(year).await?;
        let meeting = index.meeting(meeting_key)?;
        let session = meeting.session(session_key)?;

        if !session.is_importable() {
            return Err(LiveTimingError::InvalidSession(
                "it has no path defined, usually because the session has not completed yet"
                    .to_string(),
            ));
        }

        let paths = self.capture_paths(year, meeting, session);
        if let Some(existing) = paths.existing_file() {
            return Err(LiveTimingError::CaptureExists(existing.to_path_buf()));
        }

        tracing::info!(year, location = %meeting.location, session = %session.name, "Downloading session data");
        let imported = self.fetch_session(session).await?;
        write_capture(&paths, &imported.snapshot, &imported.points)?;
        Ok(paths)
    }

    /// Download every topic stream of a session and merge them
    ///
    /// A topic that fails to download contributes nothing; a session without a
    /// usable heartbeat cannot be anchored and fails.
    pub async fn fetch_session(&self, session: &IndexSession) -> Result<ImportedSession> {
        let path = session
            .path
            .as_deref()
            .ok_or_else(|| LiveTimingError::InvalidSession("missing path".to_string()))?;
        let prefix = self.static_base.join(path)?;

        let topics: Vec<Topic> = std::iter::once(Topic::SessionInfo)
            .chain(Topic::for_session(session.kind()).iter().copied())
            .collect();
        let fetched = join_all(topics.iter().map(|topic| self.fetch_topic(&prefix, *topic))).await;

        let mut session_info = Vec::new();
        let mut streams: Vec<(Topic, Vec<FeedLine>)> = Vec::with_capacity(topics.len());
        for (topic, lines) in topics.into_iter().zip(fetched) {
            if topic == Topic::SessionInfo {
                session_info = lines;
            } else {
                streams.push((topic, lines));
            }
        }

        let heartbeats = streams
            .iter()
            .find(|(topic, _)| *topic == Topic::Heartbeat)
            .map(|(_, lines)| lines.as_slice())
            .unwrap_or_default();
        let anchor = compute_anchor(heartbeats)?;
        tracing::info!(%anchor, "Computed session start");

        let mut snapshot = InitialSnapshot::new();
        if let Some(first) = session_info.into_iter().next() {
            snapshot.insert(Topic::SessionInfo, first.payload);
        }
        if let Some(first) = heartbeats.first() {
            snapshot.insert(Topic::Heartbeat, first.payload.clone());
        }

        let points = merge_streams(
            streams
                .into_iter()
                .map(|(topic, lines)| stamp(topic, lines, anchor))
                .collect(),
        );
        Ok(ImportedSession {
            anchor,
            snapshot,
            points,
        })
    }

    async fn fetch_topic(&self, prefix: &Url, topic: Topic) -> Vec<FeedLine> {
        let url = match prefix.join(&format!("{}.jsonStream", topic.wire_name())) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(%topic, error = %e, "Invalid topic URL");
                return Vec::new();
            }
        };
        tracing::debug!(%topic, %url, "Downloading topic stream");
        match self.transport.get_text(url.as_str()).await {
            Ok(body) => {
                let lines = parse_stream(topic, &body);
                tracing::debug!(%topic, lines = lines.len(), "Downloaded topic stream");
                lines
            }
            Err(e) => {
                tracing::error!(%topic, %url, error = %e, "Failed to download topic stream");
                Vec::new()
            }
        }
    }
}
