//! SMTP Transmitter
//!
//! Mails the anchor to an outside mailbox through an authenticated
//! STARTTLS relay. This is the default channel.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, info};

use crate::transmit::Transmitter;

/// Relay settings for [`SmtpTransmitter`].
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub mail_from: String,
    pub mail_to: String,
    pub timeout: Duration,
}

pub struct SmtpTransmitter {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    relay: String,
}

impl SmtpTransmitter {
    pub fn new(settings: SmtpSettings) -> Result<Self> {
        if settings.host.trim().is_empty() {
            return Err(anyhow!("SMTP host is empty"));
        }
        let from: Mailbox = settings
            .mail_from
            .parse()
            .map_err(|e| anyhow!("Invalid mail_from {:?}: {}", settings.mail_from, e))?;
        let to: Mailbox = settings
            .mail_to
            .parse()
            .map_err(|e| anyhow!("Invalid mail_to {:?}: {}", settings.mail_to, e))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| anyhow!("Invalid SMTP relay {}: {}", settings.host, e))?
            .port(settings.port)
            .credentials(Credentials::new(settings.user, settings.pass))
            .timeout(Some(settings.timeout))
            .build();

        Ok(Self {
            mailer,
            from,
            to,
            relay: format!("{}:{}", settings.host, settings.port),
        })
    }

    pub fn relay(&self) -> &str {
        &self.relay
    }

    fn message(&self, subject: &str, body: &str) -> Result<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| anyhow!("Failed to build anchor mail: {}", e))
    }
}

#[async_trait]
impl Transmitter for SmtpTransmitter {
    fn channel(&self) -> &str {
        "smtp"
    }

    async fn transmit(&self, subject: &str, body: &str) -> Result<()> {
        let message = self.message(subject, body)?;
        debug!("Sending anchor mail via {}", self.relay);

        let response = self
            .mailer
            .send(message)
            .await
            .map_err(|e| anyhow!("SMTP delivery via {} failed: {}", self.relay, e))?;

        info!("Anchor mail accepted by {} ({})", self.relay, response.code());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(port: u16) -> SmtpSettings {
        SmtpSettings {
            host: "127.0.0.1".to_string(),
            port,
            user: "ledger".to_string(),
            pass: "secret".to_string(),
            mail_from: "Decision Ledger <ledger@example.org>".to_string(),
            mail_to: "audit@example.org".to_string(),
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_message_headers() {
        let transmitter = SmtpTransmitter::new(settings(587)).unwrap();
        let message = transmitter
            .message("History Anchor 2026-02-01 3f79bb7b435b", "{\"type\":\"daily_anchor\"}")
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("<ledger@example.org>"));
        assert!(raw.contains("audit@example.org"));
        assert!(raw.contains("Subject: History Anchor 2026-02-01 3f79bb7b435b"));
        assert!(raw.contains("{\"type\":\"daily_anchor\"}"));
        assert_eq!(transmitter.relay(), "127.0.0.1:587");
    }

    #[test]
    fn test_rejects_bad_addresses() {
        let mut bad = settings(587);
        bad.mail_to = "not an address".to_string();
        assert!(SmtpTransmitter::new(bad).is_err());

        let mut empty = settings(587);
        empty.host = " ".to_string();
        assert!(SmtpTransmitter::new(empty).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_relay_fails() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transmitter = SmtpTransmitter::new(settings(port)).unwrap();

        let err = transmitter.transmit("s", "b").await.unwrap_err();
        assert!(err.to_string().contains("SMTP delivery"));
    }
}
