//! Pending rule evaluations for client-side reasoning mode.
//!
//! With no VLM configured the perception loop cannot evaluate rules itself;
//! it parks the frame thumbnail and candidate rules here for an external
//! MCP client to pick up. Bounded per camera; oldest entries evicted.

use std::collections::HashMap;
use std::collections::VecDeque;

use parking_lot::Mutex;

use pmcp_types::{CameraId, PendingAlert};

/// Per-camera queue bound.
pub const PENDING_CAP_PER_CAMERA: usize = 100;

#[derive(Default)]
pub struct PendingQueue {
    inner: Mutex<HashMap<CameraId, VecDeque<PendingAlert>>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, pending: PendingAlert) {
        let mut inner = self.inner.lock();
        let queue = inner.entry(pending.camera_id.clone()).or_default();
        if queue.len() == PENDING_CAP_PER_CAMERA {
            queue.pop_front();
        }
        queue.push_back(pending);
    }

    /// Pending entries, optionally restricted to one camera, oldest first.
    pub fn list(&self, camera_id: Option<&CameraId>) -> Vec<PendingAlert> {
        let inner = self.inner.lock();
        match camera_id {
            Some(id) => inner.get(id).map(|q| q.iter().cloned().collect()).unwrap_or_default(),
            None => {
                let mut all: Vec<PendingAlert> = inner
                    .values()
                    .flat_map(|q| q.iter().cloned())
                    .collect();
                all.sort_by_key(|p| p.created_at);
                all
            }
        }
    }

    /// Remove and return the entry matching `event_id`, if still queued.
    pub fn take(&self, event_id: &str) -> Option<PendingAlert> {
        let mut inner = self.inner.lock();
        for queue in inner.values_mut() {
            if let Some(pos) = queue.iter().position(|p| p.event_id == event_id) {
                return queue.remove(pos);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.inner.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
