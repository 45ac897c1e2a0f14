//! Mail Spool Transmitter
//!
//! Drops the anchor as an RFC 5322 message into a spool directory watched
//! by the host's mail transfer agent. Messages are written under a
//! temporary name and renamed, so the agent never picks up a partial file.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use crate::transmit::Transmitter;

pub struct MailSpoolTransmitter {
    spool_dir: PathBuf,
    mail_from: String,
    mail_to: String,
}

impl MailSpoolTransmitter {
    pub fn new(spool_dir: PathBuf, mail_from: String, mail_to: String) -> Result<Self> {
        for (name, value) in [("mail_from", &mail_from), ("mail_to", &mail_to)] {
            if value.trim().is_empty() || value.contains(['\r', '\n']) || !value.contains('@') {
                return Err(anyhow!("Invalid {} address: {:?}", name, value));
            }
        }
        Ok(Self {
            spool_dir,
            mail_from,
            mail_to,
        })
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    fn render(&self, subject: &str, body: &str, message_id: &str) -> String {
        let subject = subject.replace(['\r', '\n'], " ");
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nMessage-ID: <{}@decision-ledger>\r\n\
             MIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
            self.mail_from,
            self.mail_to,
            subject,
            Utc::now().to_rfc2822(),
            message_id,
            body
        )
    }
}

#[async_trait]
impl Transmitter for MailSpoolTransmitter {
    fn channel(&self) -> &str {
        "mail-spool"
    }

    async fn transmit(&self, subject: &str, body: &str) -> Result<()> {
        fs::create_dir_all(&self.spool_dir)
            .await
            .map_err(|e| anyhow!("Failed to create spool directory: {}", e))?;

        let message_id = Uuid::new_v4().to_string();
        let name = format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), message_id);
        let tmp_path = self.spool_dir.join(format!(".{}.tmp", name));
        let final_path = self.spool_dir.join(format!("{}.eml", name));

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| anyhow!("Failed to create spool file: {}", e))?;
        file.write_all(self.render(subject, body, &message_id).as_bytes())
            .await
            .map_err(|e| anyhow!("Failed to write spool file: {}", e))?;
        file.sync_all()
            .await
            .map_err(|e| anyhow!("Failed to sync spool file: {}", e))?;
        drop(file);

        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| anyhow!("Failed to publish spool file: {}", e))?;

        info!("Anchor mail spooled at {}", final_path.display());
        Ok(())
    }
}
