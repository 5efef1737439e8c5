//! Email notification sender via SMTP.
//!
//! Uses the `lettre` crate to send HTML-formatted notification emails over
//! STARTTLS.

use lettre::message::{header::ContentType, Mailbox};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

use super::NotificationMessage;
use crate::errors::NotificationError;

const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP email notifier.
pub struct EmailNotifier {
    smtp_addr: String,
    from: String,
    recipients: Vec<String>,
}

impl EmailNotifier {
    /// `smtp_addr` is `host` or `host:port` (e.g. `smtp.example.com:587`).
    pub fn new(smtp_addr: String, from: String, recipients: Vec<String>) -> Self {
        info!(
            smtp = %smtp_addr,
            from = %from,
            recipients = ?recipients,
            "initializing email notifier"
        );
        Self {
            smtp_addr,
            from,
            recipients,
        }
    }

    /// Send an HTML email to all configured recipients.
    pub async fn send(&self, subject: &str, html_body: &str) -> Result<(), NotificationError> {
        debug!(subject, to = ?self.recipients, "sending email");

        let from_mailbox: Mailbox = self
            .from
            .parse()
            .map_err(|e| NotificationError::EmailError(format!("invalid from address: {}", e)))?;
        let transport = self.build_transport()?;

        for recipient in &self.recipients {
            let to_mailbox: Mailbox = recipient.parse().map_err(|e| {
                NotificationError::EmailError(format!("invalid recipient '{}': {}", recipient, e))
            })?;

            let email = Message::builder()
                .from(from_mailbox.clone())
                .to(to_mailbox)
                .subject(subject)
                .header(ContentType::TEXT_HTML)
                .body(html_body.to_string())
                .map_err(|e| {
                    NotificationError::EmailError(format!("failed to build email: {}", e))
                })?;

            if let Err(e) = transport.send(email).await {
                warn!(to = %recipient, error = %e, "failed to send email");
                return Err(NotificationError::EmailError(format!(
                    "SMTP send to '{}' failed: {}",
                    recipient, e
                )));
            }
            info!(to = %recipient, "email sent successfully");
        }

        Ok(())
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotificationError> {
        let (host, port) = split_host_port(&self.smtp_addr);
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| NotificationError::EmailError(format!("SMTP connection error: {}", e)))?
            .port(port)
            .build();
        Ok(transport)
    }
}

fn split_host_port(addr: &str) -> (&str, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, port),
            Err(_) => (addr, DEFAULT_SMTP_PORT),
        },
        None => (addr, DEFAULT_SMTP_PORT),
    }
}

/// Render a notification as a small HTML document.
pub fn render_html(message: &NotificationMessage) -> String {
    let mut html = format!(
        "<html><body>\
        <h2>{}</h2>\
        <pre style=\"white-space: pre-wrap;\">{}</pre>",
        html_escape(&message.title),
        html_escape(&message.message),
    );
    if let Some(url) = &message.url {
        html.push_str(&format!(
            "<p><a href=\"{0}\">{0}</a></p>",
            html_escape(url)
        ));
    }
    html.push_str("</body></html>");
    html
}

/// Minimal HTML escaping for user-provided strings.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
