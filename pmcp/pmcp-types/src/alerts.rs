use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp::parse_timestamp;
use crate::{CameraId, Priority, RuleEvaluation, WatchRule};

/// Upper bound (and clamp target) for alert query limits.
pub const MAX_ALERT_QUERY_LIMIT: usize = 1000;

/// Closed set of alert event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WatchRuleTriggered,
    ProviderError,
    StartupWarning,
    CameraAlertPendingEval,
    McpLog,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WatchRuleTriggered => "watch_rule_triggered",
            EventType::ProviderError => "provider_error",
            EventType::StartupWarning => "startup_warning",
            EventType::CameraAlertPendingEval => "camera_alert_pending_eval",
            EventType::McpLog => "mcp_log",
        }
    }

    /// Upper-case form used in `PMCP[...]` correlation log lines.
    pub fn as_upper(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }

    /// Whether this type is mirrored as a `PMCP[...]` log line and an
    /// `mcp_log` fan-out entry carrying the same event id.
    pub fn is_correlated(&self) -> bool {
        matches!(
            self,
            EventType::WatchRuleTriggered
                | EventType::ProviderError
                | EventType::StartupWarning
                | EventType::CameraAlertPendingEval
        )
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    /// Case-insensitive; tolerates surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "watch_rule_triggered" => Ok(EventType::WatchRuleTriggered),
            "provider_error" => Ok(EventType::ProviderError),
            "startup_warning" => Ok(EventType::StartupWarning),
            "camera_alert_pending_eval" => Ok(EventType::CameraAlertPendingEval),
            "mcp_log" => Ok(EventType::McpLog),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of something the engine wants to tell a user or another
/// system about.
///
/// The timestamp is stored as a string so that entries ingested from a
/// durable log written by older builds (naive timestamps) survive replay;
/// queries parse and normalize to UTC before comparing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(default)]
    pub event_id: String,
    pub event_type: EventType,
    #[serde(default)]
    pub camera_id: CameraId,
    #[serde(default)]
    pub camera_name: String,
    #[serde(default)]
    pub rule_id: String,
    #[serde(default)]
    pub rule_name: String,
    #[serde(default)]
    pub priority: Priority,
    pub message: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub timestamp: String,
    /// Base64 JPEG thumbnail of the frame that produced this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_ref: Option<String>,
    /// Payload of `mcp_log` fan-out entries (the full `PMCP[...]` line).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl AlertEvent {
    /// Minimal event of the given type; callers fill in the rest.
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            event_id: String::new(),
            event_type,
            camera_id: CameraId::new(""),
            camera_name: String::new(),
            rule_id: String::new(),
            rule_name: String::new(),
            priority: Priority::default(),
            message: message.into(),
            reasoning: String::new(),
            confidence: 0.0,
            timestamp: String::new(),
            frame_ref: None,
            data: None,
        }
    }

    pub fn with_camera(mut self, camera_id: CameraId, camera_name: impl Into<String>) -> Self {
        self.camera_id = camera_id;
        self.camera_name = camera_name.into();
        self
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// Filter of the alert replay query (`GET /alerts`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    /// Strictly exclusive cursor; unparseable values behave as absent.
    pub since: Option<String>,
    pub until: Option<String>,
    /// Whitespace-trimmed, then compared case-sensitively.
    pub camera_id: Option<String>,
    /// Whitespace-trimmed, case-insensitive.
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    /// Clamp the requested limit into `1..=MAX_ALERT_QUERY_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(MAX_ALERT_QUERY_LIMIT)
            .clamp(1, MAX_ALERT_QUERY_LIMIT)
    }

    pub fn since_cursor(&self) -> Option<DateTime<Utc>> {
        self.since.as_deref().and_then(parse_timestamp)
    }

    pub fn until_cursor(&self) -> Option<DateTime<Utc>> {
        self.until.as_deref().and_then(parse_timestamp)
    }

    pub fn event_type_filter(&self) -> Option<EventType> {
        self.event_type.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn camera_id_filter(&self) -> Option<&str> {
        self.camera_id.as_deref().map(str::trim)
    }
}

/// A deferred rule evaluation, used when no VLM provider is configured.
///
/// The perception loop enqueues these; an external client fetches them,
/// evaluates the candidate rules against the thumbnail, and reports back
/// via `report_rule_evaluation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAlert {
    pub event_id: String,
    pub camera_id: CameraId,
    pub camera_name: String,
    pub created_at: DateTime<Utc>,
    /// Base64 JPEG of the frame awaiting evaluation.
    pub thumbnail: String,
    /// Rules that were active for this camera at enqueue time.
    pub candidate_rules: Vec<WatchRule>,
}

/// Client-side evaluation results posted back for a pending alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedEvaluation {
    pub event_id: String,
    pub evaluations: Vec<RuleEvaluation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_parse_is_tolerant() {
        assert_eq!(
            " PROVIDER_ERROR ".parse::<EventType>().unwrap(),
            EventType::ProviderError
        );
        assert_eq!(
            "Watch_Rule_Triggered".parse::<EventType>().unwrap(),
            EventType::WatchRuleTriggered
        );
        assert!("unknown".parse::<EventType>().is_err());
    }

    #[test]
    fn correlated_types() {
        assert!(EventType::ProviderError.is_correlated());
        assert!(EventType::StartupWarning.is_correlated());
        assert!(!EventType::McpLog.is_correlated());
    }

    #[test]
    fn filter_limit_clamps() {
        let mut f = AlertFilter::default();
        assert_eq!(f.effective_limit(), MAX_ALERT_QUERY_LIMIT);
        f.limit = Some(0);
        assert_eq!(f.effective_limit(), 1);
        f.limit = Some(5000);
        assert_eq!(f.effective_limit(), MAX_ALERT_QUERY_LIMIT);
        f.limit = Some(40);
        assert_eq!(f.effective_limit(), 40);
    }

    #[test]
    fn unparseable_since_behaves_as_absent() {
        let f = AlertFilter {
            since: Some("invalid".into()),
            ..Default::default()
        };
        assert!(f.since_cursor().is_none());
    }

    #[test]
    fn event_serde_skips_empty_optionals() {
        let evt = AlertEvent::new(EventType::StartupWarning, "no provider configured");
        let text = serde_json::to_string(&evt).unwrap();
        assert!(!text.contains("frame_ref"));
        assert!(!text.contains("\"data\""));
    }
}
