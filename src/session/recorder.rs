//! Capture writers for imported and live sessions

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{LiveTimingError, Result, ResultExt};
use crate::types::RawDataPoint;

use super::types::{CapturePaths, InitialSnapshot};

/// Encode one delta log record, including the trailing newline
pub fn encode_record(point: &RawDataPoint) -> Result<String> {
    let mut line = serde_json::to_string(point)?;
    line.push('\n');
    Ok(line)
}

fn ensure_absent(paths: &CapturePaths) -> Result<()> {
    match paths.existing_file() {
        Some(existing) => Err(LiveTimingError::CaptureExists(existing.to_path_buf())),
        None => Ok(()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Write `contents` to the temporary name beside `path`, returning that name
fn stage(path: &Path, contents: &[u8]) -> Result<PathBuf> {
    let temp = temp_path(path);
    let result = (|| -> Result<()> {
        let mut file = File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        Ok(())
    })();
    match result {
        Ok(()) => Ok(temp),
        Err(e) => {
            let _ = fs::remove_file(&temp);
            Err(e.with_context(format!("Writing {}", path.display())))
        }
    }
}

fn commit(temp: &Path, path: &Path) -> Result<()> {
    fs::rename(temp, path).with_context(|| format!("Renaming into {}", path.display()))
}

/// Write `contents` beside `path` and rename it into place
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let temp = stage(path, contents)?;
    commit(&temp, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp);
    })
}

/// Persist an imported session
///
/// Fails before writing anything if either capture file exists. Both files are
/// written under temporary names first and only renamed once both are
/// complete; a failure at any step removes whatever was already written.
pub fn write_capture(
    paths: &CapturePaths,
    snapshot: &InitialSnapshot,
    points: &[RawDataPoint],
) -> Result<()> {
    ensure_absent(paths)?;
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("Creating {}", paths.dir.display()))?;

    let mut log = String::new();
    for point in points {
        log.push_str(&encode_record(point)?);
    }
    let snapshot = serde_json::to_string(&snapshot.to_value())?;

    let live_temp = stage(&paths.live, log.as_bytes())?;
    let subscribe_temp = stage(&paths.subscribe, snapshot.as_bytes()).inspect_err(|_| {
        let _ = fs::remove_file(&live_temp);
    })?;
    commit(&subscribe_temp, &paths.subscribe).inspect_err(|_| {
        let _ = fs::remove_file(&subscribe_temp);
        let _ = fs::remove_file(&live_temp);
    })?;
    commit(&live_temp, &paths.live).inspect_err(|_| {
        let _ = fs::remove_file(&paths.subscribe);
        let _ = fs::remove_file(&live_temp);
    })?;

    tracing::info!(
        dir = %paths.dir.display(),
        records = points.len(),
        "Wrote session capture"
    );
    Ok(())
}

/// Append-only writer for a live capture
///
/// Each record is written with a single `write_all` of the whole line and
/// flushed before `append` returns.
#[derive(Debug)]
pub struct CaptureWriter {
    paths: CapturePaths,
    live: File,
    written: usize,
}

impl CaptureWriter {
    /// Start a new capture, writing the initial snapshot immediately
    pub fn create(paths: CapturePaths, snapshot: &InitialSnapshot) -> Result<Self> {
        ensure_absent(&paths)?;
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("Creating {}", paths.dir.display()))?;
        write_atomic(&paths.subscribe, serde_json::to_string(&snapshot.to_value())?.as_bytes())?;
        let live = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&paths.live)
            .with_context(|| format!("Opening {}", paths.live.display()))?;
        tracing::info!(dir = %paths.dir.display(), "Started live capture");
        Ok(Self {
            paths,
            live,
            written: 0,
        })
    }

    pub fn append(&mut self, point: &RawDataPoint) -> Result<()> {
        let line = encode_record(point)?;
        self.live.write_all(line.as_bytes())?;
        self.live.flush()?;
        self.written += 1;
        Ok(())
    }

    /// Records appended so far
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn paths(&self) -> &CapturePaths {
        &self.paths
    }
}
