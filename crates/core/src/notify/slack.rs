//! Slack webhook notification sender.
//!
//! Sends one attachment per message to a Slack channel via an incoming
//! webhook URL.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{NotificationLevel, NotificationMessage};
use crate::errors::NotificationError;

const FOOTER: &str = "AI Rebaser";

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    channel: &'a str,
    username: &'a str,
    icon_emoji: &'static str,
    attachments: Vec<SlackAttachment<'a>>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment<'a> {
    color: &'static str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title_link: Option<&'a str>,
    text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField<'a>>,
    footer: &'static str,
    ts: i64,
}

#[derive(Debug, Serialize)]
struct SlackField<'a> {
    title: &'static str,
    value: &'a str,
    short: bool,
}

fn color(level: NotificationLevel) -> &'static str {
    match level {
        NotificationLevel::Success => "good",
        NotificationLevel::Warning => "warning",
        NotificationLevel::Error => "danger",
        NotificationLevel::Info => "#36a64f",
    }
}

fn icon(level: NotificationLevel) -> &'static str {
    match level {
        NotificationLevel::Success => ":white_check_mark:",
        NotificationLevel::Warning => ":warning:",
        NotificationLevel::Error => ":x:",
        NotificationLevel::Info => ":information_source:",
    }
}

/// Slack incoming-webhook notifier.
pub struct SlackNotifier {
    webhook_url: String,
    channel: String,
    username: String,
    http: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String, channel: String, username: String) -> Self {
        info!(channel = %channel, "initializing Slack notifier");
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            webhook_url,
            channel,
            username,
            http,
        }
    }

    fn payload<'a>(&'a self, message: &'a NotificationMessage, ts: i64) -> SlackPayload<'a> {
        let url = message.url.as_deref();
        let fields = url
            .map(|value| {
                vec![SlackField {
                    title: "Link",
                    value,
                    short: true,
                }]
            })
            .unwrap_or_default();

        SlackPayload {
            channel: &self.channel,
            username: &self.username,
            icon_emoji: icon(message.level),
            attachments: vec![SlackAttachment {
                color: color(message.level),
                title: &message.title,
                title_link: url,
                text: &message.message,
                fields,
                footer: FOOTER,
                ts,
            }],
        }
    }

    /// Post `message` to the webhook. Any non-2xx response is an error.
    pub async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        debug!(title = %message.title, level = %message.level, "sending Slack message");

        let payload = self.payload(message, chrono::Utc::now().timestamp());
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(NotificationError::HttpError)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack webhook returned error");
            return Err(NotificationError::SlackError(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        info!(channel = %self.channel, "Slack message sent successfully");
        Ok(())
    }
}
