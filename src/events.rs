//! Motion episode ledger
//!
//! Plain-text, append-only log with one start line per episode and, once the
//! episode ends, a duration line followed by a separator:
//!
//! ```text
//! Motion Detected - 2024-05-01 14:03:12
//! Motion Ended - Duration: 4.35 seconds
//! --------------------------------------------------
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, warn};

const HEADER: &str = "Motion Detection Log\n===================\n\n";
const SEPARATOR_WIDTH: usize = 50;

/// One motion episode. `end` is set once the episode is finalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionEvent {
    pub start: DateTime<Local>,
    pub end: Option<DateTime<Local>>,
}

impl MotionEvent {
    pub fn begin(start: DateTime<Local>) -> Self {
        Self { start, end: None }
    }

    /// Finalize the episode
    pub fn finish(self, end: DateTime<Local>) -> Self {
        Self {
            start: self.start,
            end: Some(end),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }

    /// Episode length in seconds (0 while still open)
    pub fn duration_secs(&self) -> f64 {
        match self.end {
            Some(end) => (end - self.start).num_microseconds().unwrap_or(0) as f64 / 1e6,
            None => 0.0,
        }
    }
}

/// Append-only text ledger of motion episodes.
///
/// Write failures are logged and swallowed: a broken log file must never stop
/// the capture pipeline.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Open the ledger at `path`, creating parent directories and writing the
    /// header if the file is new or empty. Existing entries are kept.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let is_empty = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        if is_empty {
            fs::write(&path, HEADER)?;
        }

        debug!(path = ?path, "Event log ready");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the start of an episode
    pub fn record_start(&self, event: &MotionEvent) {
        self.append(&start_entry(event.start));
    }

    /// Record the end of a finalized episode
    pub fn record_end(&self, event: &MotionEvent) {
        if !event.is_finished() {
            warn!("Ignoring end entry for an unfinished motion event");
            return;
        }
        self.append(&end_entry(event.duration_secs()));
    }

    /// All lines of the ledger; an unreadable file reads as empty
    pub fn read_lines(&self) -> Vec<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => content.lines().map(str::to_owned).collect(),
            Err(e) => {
                warn!(path = ?self.path, "Failed to read event log: {}", e);
                Vec::new()
            }
        }
    }

    fn append(&self, entry: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(entry.as_bytes()));
        if let Err(e) = result {
            warn!(path = ?self.path, "Failed to write event log: {}", e);
        }
    }
}

fn start_entry(start: DateTime<Local>) -> String {
    format!("Motion Detected - {}\n", start.format("%Y-%m-%d %H:%M:%S"))
}

fn end_entry(duration_secs: f64) -> String {
    format!(
        "Motion Ended - Duration: {:.2} seconds\n{}\n",
        duration_secs,
        "-".repeat(SEPARATOR_WIDTH)
    )
}
