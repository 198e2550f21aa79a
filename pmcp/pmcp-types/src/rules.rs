use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{new_rule_id, CameraId};

/// Alert priority carried on rules and on the events they emit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            "CRITICAL" => Ok(Priority::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Notification channel selector.
///
/// `Auto` picks the first configured channel in the order Telegram, Discord,
/// Slack, ntfy, desktop; `None` means log only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Auto,
    Telegram,
    Discord,
    Slack,
    Ntfy,
    Webhook,
    Desktop,
    None,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Auto => "auto",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Discord => "discord",
            ChannelKind::Slack => "slack",
            ChannelKind::Ntfy => "ntfy",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Desktop => "desktop",
            ChannelKind::None => "none",
        }
    }
}

/// Where alerts from one rule should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationTarget {
    #[serde(default)]
    pub channel: ChannelKind,
    /// Channel-specific routing: chat id for Telegram, webhook URL for
    /// Discord/Slack/webhook, topic for ntfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
}

/// A user-defined natural-language watch rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchRule {
    pub id: String,
    pub name: String,
    /// Natural-language condition evaluated by the VLM against the scene.
    pub condition: String,
    /// Empty string matches any camera.
    #[serde(default)]
    pub camera_id: CameraId,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub notification: NotificationTarget,
    #[serde(default)]
    pub cooldown_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl WatchRule {
    /// Build a rule from a creation request, assigning id and timestamps.
    pub fn from_spec(spec: RuleSpec) -> Self {
        Self {
            id: new_rule_id(),
            name: spec.name,
            condition: spec.condition,
            camera_id: spec.camera_id.unwrap_or_else(|| CameraId::new("")),
            priority: spec.priority,
            notification: spec.notification,
            cooldown_seconds: spec.cooldown_seconds,
            enabled: true,
            created_at: Utc::now(),
            last_triggered: None,
            trigger_count: 0,
            custom_message: spec.custom_message,
            owner_id: spec.owner_id,
        }
    }

    /// True while the rule is inside its cooldown window at `now`.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered {
            Some(t) => {
                let elapsed = now.signed_duration_since(t);
                elapsed < chrono::Duration::seconds(self.cooldown_seconds as i64)
            }
            None => false,
        }
    }

    /// True when this rule applies to frames of `camera_id`.
    pub fn matches_camera(&self, camera_id: &CameraId) -> bool {
        self.camera_id.is_empty() || &self.camera_id == camera_id
    }
}

/// Client-supplied fields for rule creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub condition: String,
    #[serde(default)]
    pub camera_id: Option<CameraId>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub notification: NotificationTarget,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub custom_message: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

fn default_cooldown() -> u64 {
    60
}

/// One rule's verdict as produced by the VLM (or a client-side evaluator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub triggered: bool,
    /// Confidence in `[0, 1]`; values outside are clamped by the consumer.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_parse_tolerates_case_and_whitespace() {
        assert_eq!(" high ".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("CRITICAL".parse::<Priority>().unwrap(), Priority::Critical);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn cooldown_window() {
        let mut rule = WatchRule::from_spec(RuleSpec {
            name: "r".into(),
            condition: "anything".into(),
            camera_id: None,
            priority: Priority::default(),
            notification: NotificationTarget::default(),
            cooldown_seconds: 30,
            custom_message: None,
            owner_id: None,
        });
        let now = Utc::now();
        assert!(!rule.in_cooldown(now));
        rule.last_triggered = Some(now - chrono::Duration::seconds(10));
        assert!(rule.in_cooldown(now));
        rule.last_triggered = Some(now - chrono::Duration::seconds(30));
        assert!(!rule.in_cooldown(now));
    }

    #[test]
    fn empty_camera_matches_all() {
        let mut rule = WatchRule::from_spec(RuleSpec {
            name: "r".into(),
            condition: "c".into(),
            camera_id: None,
            priority: Priority::default(),
            notification: NotificationTarget::default(),
            cooldown_seconds: 0,
            custom_message: None,
            owner_id: None,
        });
        assert!(rule.matches_camera(&CameraId::new("usb:0")));
        rule.camera_id = CameraId::new("rtsp:door");
        assert!(!rule.matches_camera(&CameraId::new("usb:0")));
        assert!(rule.matches_camera(&CameraId::new("rtsp:door")));
    }

    #[test]
    fn rule_yaml_round_trip() {
        let rule = WatchRule::from_spec(RuleSpec {
            name: "door watch".into(),
            condition: "a person is at the door".into(),
            camera_id: Some(CameraId::new("front")),
            priority: Priority::High,
            notification: NotificationTarget {
                channel: ChannelKind::Telegram,
                routing: Some("12345".into()),
            },
            cooldown_seconds: 120,
            custom_message: None,
            owner_id: Some("alice".into()),
        });
        let text = serde_yaml::to_string(&rule).unwrap();
        let back: WatchRule = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, rule);
    }
}
