//! Concrete delivery channels.
//!
//! Each function performs exactly one delivery attempt; retry policy lives
//! in the dispatcher. Functions take explicit endpoint URLs so tests can
//! point them at a local server.

use std::time::Duration;

use base64::Engine as _;
use serde_json::json;

use pmcp_config_data::NotificationsConfig;
use pmcp_types::ChannelKind;

use super::{format_message, DeliveryJob};

pub type Result<T> = std::result::Result<T, ChannelError>;

#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("http error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
    #[error("channel endpoint returned status {0}")]
    Status(u16),
    #[error("channel is not configured")]
    NotConfigured,
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[cfg(target_os = "linux")]
    #[error("desktop notification error: {0}")]
    Desktop(String),
}

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

fn client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(super::DELIVERY_TIMEOUT)
        .build()?)
}

/// Route one job to its resolved channel.
pub async fn send(cfg: &NotificationsConfig, channel: ChannelKind, job: &DeliveryJob) -> Result<()> {
    match channel {
        ChannelKind::Telegram => {
            let tg = cfg.telegram.as_ref().ok_or(ChannelError::NotConfigured)?;
            telegram(TELEGRAM_API_BASE, &tg.bot_token, &tg.chat_id, job).await
        }
        ChannelKind::Discord => {
            let url = cfg.discord.as_ref().ok_or(ChannelError::NotConfigured)?;
            discord(url, job).await
        }
        ChannelKind::Slack => {
            let url = cfg.slack.as_ref().ok_or(ChannelError::NotConfigured)?;
            slack(url, job).await
        }
        ChannelKind::Ntfy => {
            let ntfy_cfg = cfg.ntfy.as_ref().ok_or(ChannelError::NotConfigured)?;
            ntfy(&ntfy_cfg.server, &ntfy_cfg.topic, job).await
        }
        ChannelKind::Webhook => {
            let hook = job
                .target
                .routing
                .as_deref()
                .or(cfg.webhook.as_ref().map(|w| w.url.as_str()))
                .ok_or(ChannelError::NotConfigured)?;
            let include_image = cfg.webhook.as_ref().map(|w| w.include_image).unwrap_or(true);
            webhook(hook, include_image, job).await
        }
        ChannelKind::Desktop => desktop(job).await,
        ChannelKind::Auto | ChannelKind::None => Ok(()),
    }
}

fn ok_status(status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ChannelError::Status(status.as_u16()))
    }
}

/// Telegram Bot API: `sendPhoto` with caption when a thumbnail exists,
/// `sendMessage` otherwise. Routing overrides the configured chat id.
pub async fn telegram(api_base: &str, bot_token: &str, chat_id: &str, job: &DeliveryJob) -> Result<()> {
    let chat_id = job.target.routing.as_deref().unwrap_or(chat_id);
    let text = format_message(&job.alert);
    let client = client()?;

    let response = match &job.thumbnail {
        Some(jpeg) => {
            let photo = reqwest::multipart::Part::bytes(jpeg.to_vec())
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?;
            let form = reqwest::multipart::Form::new()
                .text("chat_id", chat_id.to_string())
                .text("caption", text)
                .part("photo", photo);
            client
                .post(format!("{api_base}/bot{bot_token}/sendPhoto"))
                .multipart(form)
                .send()
                .await?
        }
        None => {
            client
                .post(format!("{api_base}/bot{bot_token}/sendMessage"))
                .json(&json!({ "chat_id": chat_id, "text": text }))
                .send()
                .await?
        }
    };
    ok_status(response.status())
}

/// Discord webhook: embed plus an attached image when available.
pub async fn discord(webhook_url: &str, job: &DeliveryJob) -> Result<()> {
    let url = job.target.routing.as_deref().unwrap_or(webhook_url);
    let text = format_message(&job.alert);
    let client = client()?;

    let response = match &job.thumbnail {
        Some(jpeg) => {
            let payload = json!({
                "embeds": [{
                    "title": job.alert.rule_name,
                    "description": text,
                    "image": { "url": "attachment://frame.jpg" },
                }],
            });
            let file = reqwest::multipart::Part::bytes(jpeg.to_vec())
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?;
            let form = reqwest::multipart::Form::new()
                .text("payload_json", payload.to_string())
                .part("files[0]", file);
            client.post(url).multipart(form).send().await?
        }
        None => {
            client
                .post(url)
                .json(&json!({ "content": text }))
                .send()
                .await?
        }
    };
    ok_status(response.status())
}

/// Slack incoming webhook, Block Kit layout. Text only.
pub async fn slack(webhook_url: &str, job: &DeliveryJob) -> Result<()> {
    let url = job.target.routing.as_deref().unwrap_or(webhook_url);
    let text = format_message(&job.alert);
    let body = json!({
        "blocks": [
            {
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": job.alert.rule_name.clone(),
                    "emoji": true,
                },
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": text },
            },
        ],
    });
    let response = client()?.post(url).json(&body).send().await?;
    ok_status(response.status())
}

/// ntfy topic POST; the photo rides along as an attachment upload.
pub async fn ntfy(server: &str, topic: &str, job: &DeliveryJob) -> Result<()> {
    let topic = job.target.routing.as_deref().unwrap_or(topic);
    let url = format!("{}/{topic}", server.trim_end_matches('/'));
    let text = format_message(&job.alert);
    let client = client()?;

    let response = match &job.thumbnail {
        Some(jpeg) => {
            client
                .put(&url)
                .header("X-Title", job.alert.rule_name.clone())
                .header("X-Message", text.replace('\n', " "))
                .header("X-Filename", "frame.jpg")
                .body(jpeg.to_vec())
                .send()
                .await?
        }
        None => {
            client
                .post(&url)
                .header("X-Title", job.alert.rule_name.clone())
                .body(text)
                .send()
                .await?
        }
    };
    ok_status(response.status())
}

/// Generic webhook: the whole alert as JSON, image as a base64 field.
pub async fn webhook(url: &str, include_image: bool, job: &DeliveryJob) -> Result<()> {
    let mut body = serde_json::to_value(&job.alert).unwrap_or_default();
    if include_image {
        if let (Some(map), Some(jpeg)) = (body.as_object_mut(), &job.thumbnail) {
            map.insert(
                "image_base64".to_string(),
                json!(base64::engine::general_purpose::STANDARD.encode(jpeg)),
            );
        }
    }
    let response = client()?.post(url).json(&body).send().await?;
    ok_status(response.status())
}

/// Desktop notification over the freedesktop D-Bus interface.
#[cfg(target_os = "linux")]
pub async fn desktop(job: &DeliveryJob) -> Result<()> {
    use std::collections::HashMap;

    let connection = zbus::Connection::session()
        .await
        .map_err(|e| ChannelError::Desktop(e.to_string()))?;
    let summary = if job.alert.rule_name.is_empty() {
        "physical-mcp".to_string()
    } else {
        job.alert.rule_name.clone()
    };
    let body = format_message(&job.alert);
    connection
        .call_method(
            Some("org.freedesktop.Notifications"),
            "/org/freedesktop/Notifications",
            Some("org.freedesktop.Notifications"),
            "Notify",
            &(
                "physical-mcp",
                0u32,
                "camera-video",
                summary.as_str(),
                body.as_str(),
                Vec::<&str>::new(),
                HashMap::<&str, zbus::zvariant::Value>::new(),
                -1i32,
            ),
        )
        .await
        .map_err(|e| ChannelError::Desktop(e.to_string()))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub async fn desktop(_job: &DeliveryJob) -> Result<()> {
    Err(ChannelError::NotConfigured)
}
