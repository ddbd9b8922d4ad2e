//! Listing of saved recordings

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, warn};

const UNKNOWN: &str = "unknown";

/// One saved clip, as shown in the recordings list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingInfo {
    pub filename: String,
    /// `YYYY-MM-DD`, or `unknown` if the name carries no timestamp
    pub date: String,
    /// `HH:MM:SS`, or `unknown`
    pub time: String,
    pub size_bytes: u64,
}

/// Read-only view of the recordings directory
#[derive(Debug, Clone)]
pub struct RecordingLibrary {
    root: PathBuf,
    extension: String,
}

impl RecordingLibrary {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Recordings, newest first. A missing directory lists as empty.
    pub fn list(&self) -> Vec<RecordingInfo> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = ?self.root, "Recordings directory not readable: {}", e);
                return Vec::new();
            }
        };

        let mut recordings: Vec<RecordingInfo> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let filename = entry.file_name().to_str()?.to_owned();
                self.is_recording_name(&filename)
                    .then(|| self.describe(&filename, &entry.path()))
            })
            .collect();

        // timestamped names sort chronologically
        recordings.sort_by(|a, b| b.filename.cmp(&a.filename));
        recordings
    }

    /// Details of one recording, if `filename` names a recording in the library
    pub fn get(&self, filename: &str) -> Option<RecordingInfo> {
        if !is_plain_filename(filename) || !self.is_recording_name(filename) {
            return None;
        }
        let path = self.root.join(filename);
        path.is_file().then(|| self.describe(filename, &path))
    }

    fn is_recording_name(&self, filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .is_some_and(|ext| ext == self.extension.as_str())
    }

    fn describe(&self, filename: &str, path: &Path) -> RecordingInfo {
        let size_bytes = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = ?path, "Failed to stat recording: {}", e);
                0
            }
        };
        let (date, time) = match parse_timestamp(filename) {
            Some(ts) => (
                ts.format("%Y-%m-%d").to_string(),
                ts.format("%H:%M:%S").to_string(),
            ),
            None => (UNKNOWN.to_string(), UNKNOWN.to_string()),
        };
        RecordingInfo {
            filename: filename.to_string(),
            date,
            time,
            size_bytes,
        }
    }
}

/// Timestamp encoded in `motion_<YYYYMMDD>_<HHMMSS>[_n].<ext>`
pub fn parse_timestamp(filename: &str) -> Option<NaiveDateTime> {
    let stem = Path::new(filename).file_stem()?.to_str()?;
    let rest = stem.strip_prefix("motion_")?;
    let stamp = rest.get(..15)?;
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").ok()
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}
