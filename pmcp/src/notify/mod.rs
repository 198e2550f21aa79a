//! Notification dispatch.
//!
//! `dispatch` queues and returns; a worker task drains the queue and spawns
//! one delivery task per job so a slow channel never holds up the next
//! alert. Failures are logged, retried once, then dropped - they never
//! propagate into the perception pipeline.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pmcp_config_data::NotificationsConfig;
use pmcp_types::{AlertEvent, ChannelKind, NotificationTarget, Priority};

pub mod channels;

/// Per-delivery deadline.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);
/// Pause before the single retry.
const RETRY_DELAY: Duration = Duration::from_secs(2);
/// Queued-but-undelivered bound; beyond this, jobs are dropped with a log.
const QUEUE_DEPTH: usize = 64;

#[derive(Debug)]
pub struct DeliveryJob {
    pub alert: AlertEvent,
    pub target: NotificationTarget,
    pub thumbnail: Option<Bytes>,
}

/// Handle used by the engine to enqueue deliveries.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<DeliveryJob>,
}

pub struct NotifierTask {
    pub notifier: Notifier,
    pub join: tokio::task::JoinHandle<()>,
}

/// Which concrete channel a target resolves to, in `auto` priority order
/// Telegram > Discord > Slack > ntfy > desktop > none.
pub fn resolve_channel(kind: ChannelKind, cfg: &NotificationsConfig) -> ChannelKind {
    let kind = if kind == ChannelKind::Auto {
        cfg.default_channel
    } else {
        kind
    };
    match kind {
        ChannelKind::Auto => {
            if cfg.telegram.is_some() {
                ChannelKind::Telegram
            } else if cfg.discord.is_some() {
                ChannelKind::Discord
            } else if cfg.slack.is_some() {
                ChannelKind::Slack
            } else if cfg.ntfy.is_some() {
                ChannelKind::Ntfy
            } else if cfg.desktop {
                ChannelKind::Desktop
            } else {
                ChannelKind::None
            }
        }
        other => other,
    }
}

fn priority_marker(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "ℹ️",
        Priority::Medium => "🔔",
        Priority::High => "⚠️",
        Priority::Critical => "🚨",
    }
}

/// Human-readable alert body shared by all channels. Always valid UTF-8 by
/// construction; channels never see surrogate halves.
pub fn format_message(alert: &AlertEvent) -> String {
    let mut out = format!("{} {}", priority_marker(alert.priority), alert.message);
    if !alert.camera_name.is_empty() {
        out.push_str(&format!("\nCamera: {}", alert.camera_name));
    }
    if alert.confidence > 0.0 {
        out.push_str(&format!("\nConfidence: {:.0}%", alert.confidence * 100.0));
    }
    if !alert.reasoning.is_empty() {
        out.push_str(&format!("\n{}", alert.reasoning));
    }
    out
}

impl Notifier {
    pub fn spawn(cfg: NotificationsConfig) -> NotifierTask {
        let (tx, mut rx) = mpsc::channel::<DeliveryJob>(QUEUE_DEPTH);
        let cfg = Arc::new(cfg);
        let join = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let cfg = cfg.clone();
                // One task per delivery: a hung webhook only stalls itself.
                tokio::spawn(async move {
                    deliver_with_retry(&cfg, job).await;
                });
            }
            debug!("notifier queue drained");
        });
        NotifierTask {
            notifier: Notifier { tx },
            join,
        }
    }

    /// Queue a delivery. Returns immediately; a full queue drops the job.
    pub fn dispatch(&self, alert: AlertEvent, target: NotificationTarget, thumbnail: Option<Bytes>) {
        let job = DeliveryJob {
            alert,
            target,
            thumbnail,
        };
        if let Err(e) = self.tx.try_send(job) {
            warn!("notification queue full, dropping alert: {e}");
        }
    }
}

async fn deliver_with_retry(cfg: &NotificationsConfig, job: DeliveryJob) {
    let channel = resolve_channel(job.target.channel, cfg);
    if channel == ChannelKind::None {
        debug!(event = %job.alert.event_id, "no notification channel configured, log only");
        return;
    }

    match attempt(cfg, channel, &job).await {
        Ok(()) => {
            info!(event = %job.alert.event_id, channel = channel.as_str(), "alert delivered");
        }
        Err(first) => {
            warn!(
                event = %job.alert.event_id,
                channel = channel.as_str(),
                "delivery failed ({first}), retrying once"
            );
            tokio::time::sleep(RETRY_DELAY).await;
            if let Err(second) = attempt(cfg, channel, &job).await {
                warn!(
                    event = %job.alert.event_id,
                    channel = channel.as_str(),
                    "delivery dropped after retry: {second}"
                );
            }
        }
    }
}

async fn attempt(
    cfg: &NotificationsConfig,
    channel: ChannelKind,
    job: &DeliveryJob,
) -> channels::Result<()> {
    let send = channels::send(cfg, channel, job);
    match tokio::time::timeout(DELIVERY_TIMEOUT, send).await {
        Ok(result) => result,
        Err(_) => Err(channels::ChannelError::Timeout(DELIVERY_TIMEOUT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmcp_config_data::{NtfyConfig, TelegramConfig};
    use pmcp_types::EventType;

    fn cfg_with(telegram: bool, slack: bool, ntfy: bool) -> NotificationsConfig {
        NotificationsConfig {
            telegram: telegram.then(|| TelegramConfig {
                bot_token: "t".into(),
                chat_id: "c".into(),
            }),
            slack: slack.then(|| "https://hooks.slack.example/x".to_string()),
            ntfy: ntfy.then(|| NtfyConfig {
                server: "https://ntfy.sh".into(),
                topic: "top".into(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn auto_selects_in_priority_order() {
        assert_eq!(
            resolve_channel(ChannelKind::Auto, &cfg_with(true, true, true)),
            ChannelKind::Telegram
        );
        assert_eq!(
            resolve_channel(ChannelKind::Auto, &cfg_with(false, true, true)),
            ChannelKind::Slack
        );
        assert_eq!(
            resolve_channel(ChannelKind::Auto, &cfg_with(false, false, true)),
            ChannelKind::Ntfy
        );
        assert_eq!(
            resolve_channel(ChannelKind::Auto, &cfg_with(false, false, false)),
            ChannelKind::None
        );
    }

    #[test]
    fn explicit_channel_bypasses_auto() {
        assert_eq!(
            resolve_channel(ChannelKind::Slack, &cfg_with(true, true, true)),
            ChannelKind::Slack
        );
    }

    #[test]
    fn message_includes_emoji_and_confidence() {
        let mut alert = AlertEvent::new(EventType::WatchRuleTriggered, "Person at the door 🚪");
        alert.priority = Priority::Critical;
        alert.camera_name = "Front".into();
        alert.confidence = 0.93;
        alert.reasoning = "a person is clearly visible".into();
        let text = format_message(&alert);
        assert!(text.starts_with("🚨"));
        assert!(text.contains("Person at the door 🚪"));
        assert!(text.contains("Camera: Front"));
        assert!(text.contains("Confidence: 93%"));
        // The formatted body is valid UTF-8 by construction; double-check
        // the emoji survived intact.
        assert!(text.contains('🚪'));
    }
}
