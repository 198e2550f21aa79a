use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where rule reasoning happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningMode {
    /// A VLM provider is configured; the engine evaluates rules itself.
    Server,
    /// No provider; pending evaluations are queued for an external client.
    Client,
}

/// Per-camera health as exposed at `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Running,
    Degraded,
    Backoff,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraHealth {
    pub status: CameraStatus,
    pub consecutive_errors: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_frame_at: Option<DateTime<Utc>>,
}

impl Default for CameraHealth {
    fn default() -> Self {
        Self {
            status: CameraStatus::Running,
            consecutive_errors: 0,
            backoff_until: None,
            last_success_at: None,
            last_frame_at: None,
        }
    }
}

impl CameraHealth {
    /// One provider or capture error happened.
    pub fn record_error(&mut self, backoff_until: Option<DateTime<Utc>>) {
        self.consecutive_errors += 1;
        self.backoff_until = backoff_until;
        self.status = match backoff_until {
            Some(until) if until > Utc::now() => CameraStatus::Backoff,
            _ => CameraStatus::Degraded,
        };
    }

    /// A successful analysis resets the error path.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_errors = 0;
        self.backoff_until = None;
        self.last_success_at = Some(now);
        self.status = CameraStatus::Running;
    }

    pub fn record_frame(&mut self, now: DateTime<Utc>) {
        self.last_frame_at = Some(now);
    }

    pub fn mark_offline(&mut self) {
        self.status = CameraStatus::Offline;
    }
}
