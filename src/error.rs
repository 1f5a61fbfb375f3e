//! Error handling for the live-timing engine
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the ingestion, replay and merge code.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for live-timing operations
#[derive(Error, Debug)]
pub enum LiveTimingError {
    /// Errors from the HTTP client while talking to the feed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Errors from the live websocket connection
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Malformed URL built from configuration
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// A capture file already exists and would be overwritten
    #[error("Capture file at '{}' already exists. Delete it before importing data.", .0.display())]
    CaptureExists(PathBuf),

    /// The session has no usable heartbeat to anchor timestamps on
    #[error("Unable to find the first heartbeat data point for the session")]
    MissingAnchor,

    /// A meeting or session key did not resolve
    #[error("{0} not found")]
    NotFound(String),

    /// The session exists but cannot be imported yet
    #[error("Session cannot be imported: {0}")]
    InvalidSession(String),

    /// A feed or capture line could not be parsed
    #[error("Malformed line: {0}")]
    MalformedLine(String),

    /// The live feed answered with something other than the expected hub protocol
    #[error("Live feed protocol error: {0}")]
    Protocol(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<LiveTimingError>,
    },
}

impl LiveTimingError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        LiveTimingError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error should be shown to the user rather than treated as a crash
    pub fn is_user_facing(&self) -> bool {
        match self {
            LiveTimingError::CaptureExists(_)
            | LiveTimingError::NotFound(_)
            | LiveTimingError::InvalidSession(_)
            | LiveTimingError::MissingAnchor => true,
            LiveTimingError::WithContext { source, .. } => source.is_user_facing(),
            _ => false,
        }
    }
}

/// Result type alias for live-timing operations
pub type Result<T> = std::result::Result<T, LiveTimingError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<LiveTimingError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
