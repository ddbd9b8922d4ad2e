//! Latest motion status, shared between the producer loop and status queries

use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use tokio::sync::watch;

/// Snapshot of the motion state.
///
/// Serializes as `{"motion": bool, "last_motion": "YYYY-MM-DD HH:MM:SS" | null}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MotionStatus {
    pub motion: bool,
    #[serde(serialize_with = "serialize_timestamp")]
    pub last_motion: Option<DateTime<Local>>,
}

fn serialize_timestamp<S: Serializer>(
    value: &Option<DateTime<Local>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(ts) => serializer.serialize_str(&ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        None => serializer.serialize_none(),
    }
}

/// Last-writer-wins motion status.
///
/// Backed by a watch channel: the pair is replaced atomically, so a reader
/// never observes `motion` from one update and `last_motion` from another.
#[derive(Clone)]
pub struct StatusStore {
    tx: Arc<watch::Sender<MotionStatus>>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(MotionStatus::default());
        Self { tx: Arc::new(tx) }
    }

    /// A recording started at `at`
    pub fn motion_started(&self, at: DateTime<Local>) {
        self.tx.send_replace(MotionStatus {
            motion: true,
            last_motion: Some(at),
        });
    }

    /// The current episode ended. `last_motion` keeps the episode's start.
    pub fn motion_ended(&self) {
        self.tx.send_modify(|status| status.motion = false);
    }

    pub fn snapshot(&self) -> MotionStatus {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every update
    pub fn subscribe(&self) -> watch::Receiver<MotionStatus> {
        self.tx.subscribe()
    }
}
