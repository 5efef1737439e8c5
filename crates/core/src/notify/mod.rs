//! Run notifications.
//!
//! Supports Slack webhook and SMTP email channels. The
//! [`NotificationDispatcher`] sends each message to every configured channel
//! and only fails when all of them do.

pub mod email;
pub mod slack;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::NotificationConfig;
use crate::errors::NotificationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// A message for humans about one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub title: String,
    pub message: String,
    pub url: Option<String>,
    pub level: NotificationLevel,
}

impl NotificationMessage {
    pub fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            url: None,
            level,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError>;
}

/// Fans a message out to every configured channel.
pub struct NotificationDispatcher {
    slack: Option<slack::SlackNotifier>,
    email: Option<email::EmailNotifier>,
}

impl NotificationDispatcher {
    pub fn new(config: &NotificationConfig) -> Self {
        let slack = config.slack.webhook_url.as_ref().map(|url| {
            info!(channel = %config.slack.channel, "Slack notifications enabled");
            slack::SlackNotifier::new(
                url.clone(),
                config.slack.channel.clone(),
                config.slack.username.clone(),
            )
        });

        let email = match (&config.email_smtp, &config.email_from) {
            (Some(smtp), Some(from)) if !config.email_recipients.is_empty() => {
                info!("email notifications enabled");
                Some(email::EmailNotifier::new(
                    smtp.clone(),
                    from.clone(),
                    config.email_recipients.clone(),
                ))
            }
            _ => None,
        };

        Self { slack, email }
    }

    /// Return whether any notification channel is configured.
    pub fn is_configured(&self) -> bool {
        self.slack.is_some() || self.email.is_some()
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        if !self.is_configured() {
            info!(title = %message.title, "no notification channel configured, skipping");
            return Ok(());
        }

        let mut errors = Vec::new();
        let mut channels = 0;

        if let Some(ref slack) = self.slack {
            channels += 1;
            if let Err(e) = slack.send(message).await {
                warn!(error = %e, "Slack notification failed");
                errors.push(format!("Slack: {}", e));
            }
        }

        if let Some(ref email) = self.email {
            channels += 1;
            let subject = format!("[rebaiser] {}", message.title);
            if let Err(e) = email.send(&subject, &email::render_html(message)).await {
                warn!(error = %e, "email notification failed");
                errors.push(format!("Email: {}", e));
            }
        }

        if errors.len() >= channels {
            return Err(NotificationError::AllChannelsFailed(errors.join("; ")));
        }
        Ok(())
    }
}
