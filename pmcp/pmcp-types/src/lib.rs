//! Shared data model for the physical-mcp perception engine.
//!
//! These types cross crate boundaries: the camera layer produces [`Frame`]s,
//! the perception loop consumes them and produces [`AlertEvent`]s, and the
//! HTTP surface serializes most of what is here.

use serde::{Deserialize, Serialize};

mod alerts;
mod frame;
mod health;
mod ids;
mod rules;
mod scene;
pub mod timestamp;

pub use alerts::{
    AlertEvent, AlertFilter, EventType, PendingAlert, ReportedEvaluation, MAX_ALERT_QUERY_LIMIT,
};
pub use frame::{Frame, JPEG_EOI, JPEG_SOI};
pub use health::{CameraHealth, CameraStatus, ReasoningMode};
pub use ids::{new_event_id, new_rule_id};
pub use rules::{
    ChannelKind, NotificationTarget, Priority, RuleEvaluation, RuleSpec, WatchRule,
};
pub use scene::{ChangeLogEntry, SceneAnalysis, SceneState, CHANGE_LOG_CAP};

/// Stable identifier of one camera, e.g. `usb:0` or `front-door`.
///
/// The empty id is meaningful in rule filters, where it means "any camera".
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new<S: Into<String>>(s: S) -> Self {
        CameraId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for CameraId {
    fn from(orig: &str) -> Self {
        CameraId(orig.to_string())
    }
}

/// Error response body used by every HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<CameraId>,
}

impl ApiError {
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            camera_id: None,
        }
    }

    pub fn for_camera<S: Into<String>>(code: ErrorCode, message: S, camera_id: CameraId) -> Self {
        Self {
            code,
            message: message.into(),
            camera_id: Some(camera_id),
        }
    }
}

/// Machine-readable error codes of the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    CameraNotFound,
    CameraNotAvailable,
    CameraOpenTimeout,
    RuleNotFound,
    InvalidRequest,
    ProviderBadJson,
    RateLimited,
    Unauthorized,
}

/// Response of the runtime provider switch operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureProviderResponse {
    pub provider: String,
    pub model: String,
    pub reasoning_mode: ReasoningMode,
    pub fallback_warning_emitted: bool,
    /// `"runtime_switch"` when a server-to-client downgrade happened, else empty.
    pub fallback_warning_reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_id_serde_is_transparent() {
        let id = CameraId::new("usb:0");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"usb:0\"");
        let back: CameraId = serde_json::from_str("\"usb:0\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn error_code_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::ProviderBadJson).unwrap(),
            "\"provider_bad_json\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::Unauthorized).unwrap(),
            "\"unauthorized\""
        );
    }
}
