//! Cross-camera change feed backing `GET /changes`.
//!
//! A bounded recent-history buffer plus a broadcast channel for long-poll
//! waiters. Unlike the alert log, entries here are lightweight and purely
//! informational.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use pmcp_types::CameraId;

const RECENT_CAP: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct ChangeRecord {
    pub camera_id: CameraId,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

pub struct ChangeFeed {
    recent: Mutex<VecDeque<ChangeRecord>>,
    tx: broadcast::Sender<ChangeRecord>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAP)),
            tx,
        }
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, record: ChangeRecord) {
        {
            let mut recent = self.recent.lock();
            if recent.len() == RECENT_CAP {
                recent.pop_front();
            }
            recent.push_back(record.clone());
        }
        let _ = self.tx.send(record);
    }

    /// Entries newer than `since` (exclusive), optionally for one camera.
    pub fn list(&self, since: Option<DateTime<Utc>>, camera_id: Option<&CameraId>) -> Vec<ChangeRecord> {
        self.recent
            .lock()
            .iter()
            .filter(|r| since.map_or(true, |s| r.timestamp > s))
            .filter(|r| camera_id.map_or(true, |c| &r.camera_id == c))
            .cloned()
            .collect()
    }

    /// Block until any new entry arrives or `timeout` elapses.
    pub async fn wait_for_next(&self, timeout: std::time::Duration) -> Option<ChangeRecord> {
        let mut rx = self.tx.subscribe();
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Ok(record)) => Some(record),
            _ => None,
        }
    }
}
