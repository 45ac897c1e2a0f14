//! Transmission Module
//!
//! Delivers the anchor payload to a channel outside the ledger host, so a
//! later rewrite of the ledger and of the local anchor files is still
//! contradicted by a copy the operator does not control.

pub mod payload;
pub mod smtp;
pub mod spool;
pub mod webhook;

use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::config::{AppConfig, TransmitKind};
use crate::error::LedgerError;

pub use payload::AnchorPayload;
pub use smtp::{SmtpSettings, SmtpTransmitter};
pub use spool::MailSpoolTransmitter;
pub use webhook::WebhookTransmitter;

/// An external delivery channel. Implementations bound their own I/O with
/// a timeout and report failure instead of hanging.
#[async_trait]
pub trait Transmitter: Send + Sync {
    /// Short channel name for logs.
    fn channel(&self) -> &str;

    async fn transmit(&self, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Build the transport selected by configuration.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn Transmitter>, LedgerError> {
    let transmit = &config.transmit;
    match transmit.kind {
        TransmitKind::Smtp => {
            let required = |value: &Option<String>, key: &str| {
                value.clone().ok_or_else(|| {
                    LedgerError::ConfigError(format!("transmit.{} is required for smtp", key))
                })
            };
            let settings = SmtpSettings {
                host: required(&transmit.smtp_host, "smtp_host")?,
                port: transmit.smtp_port,
                user: required(&transmit.smtp_user, "smtp_user")?,
                pass: required(&transmit.smtp_pass, "smtp_pass")?,
                mail_from: required(&transmit.mail_from, "mail_from")?,
                mail_to: required(&transmit.mail_to, "mail_to")?,
                timeout: config.transmit_timeout(),
            };
            let transmitter =
                SmtpTransmitter::new(settings).map_err(|e| LedgerError::ConfigError(e.to_string()))?;
            Ok(Arc::new(transmitter))
        }
        TransmitKind::Webhook => {
            let url = transmit.webhook_url.clone().ok_or_else(|| {
                LedgerError::ConfigError("transmit.webhook_url is required for webhook".to_string())
            })?;
            let transmitter = WebhookTransmitter::new(url, config.transmit_timeout())
                .map_err(|e| LedgerError::ConfigError(e.to_string()))?;
            Ok(Arc::new(transmitter))
        }
        TransmitKind::Spool => {
            let (from, to) = match (&transmit.mail_from, &transmit.mail_to) {
                (Some(from), Some(to)) => (from.clone(), to.clone()),
                _ => {
                    return Err(LedgerError::ConfigError(
                        "transmit.mail_from and transmit.mail_to are required for spool"
                            .to_string(),
                    ))
                }
            };
            let transmitter = MailSpoolTransmitter::new(transmit.spool_dir.clone(), from, to)
                .map_err(|e| LedgerError::ConfigError(e.to_string()))?;
            Ok(Arc::new(transmitter))
        }
    }
}

/// Like [`from_config`], but a misconfigured channel becomes an
/// [`Unavailable`] transport so local anchoring still runs and only the
/// send step fails.
pub fn from_config_or_unavailable(config: &AppConfig) -> Arc<dyn Transmitter> {
    match from_config(config) {
        Ok(transmitter) => transmitter,
        Err(e) => {
            warn!("Anchor transmission unavailable: {}", e);
            Arc::new(Unavailable {
                reason: e.to_string(),
            })
        }
    }
}

/// Stands in for a channel that could not be configured. Every send fails.
pub struct Unavailable {
    reason: String,
}

#[async_trait]
impl Transmitter for Unavailable {
    fn channel(&self) -> &str {
        "unavailable"
    }

    async fn transmit(&self, _subject: &str, _body: &str) -> anyhow::Result<()> {
        Err(anyhow!("no transmission channel: {}", self.reason))
    }
}
