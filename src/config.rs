//! Layered configuration: defaults, optional TOML file, `LEDGER_*`
//! environment variables. CLI overrides are applied by the binary.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::LedgerError;

pub const DEFAULT_CONFIG_FILE: &str = "ledger.toml";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://ledger.db";
pub const DEFAULT_ANCHOR_FILE: &str = "ANCHOR.txt";
pub const DEFAULT_ANCHOR_HISTORY: &str = "ANCHOR_HISTORY.log";
pub const DEFAULT_LOCK_FILE: &str = "ledger.lock";
pub const DEFAULT_LABEL: &str = "EOD";
pub const DEFAULT_TRANSMIT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub anchor_file: PathBuf,
    pub anchor_history: PathBuf,
    pub lock_file: PathBuf,
    pub publish: PublishConfig,
    pub transmit: TransmitConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub label: String,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransmitKind {
    Smtp,
    Spool,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmitConfig {
    pub kind: TransmitKind,
    pub timeout_secs: u64,
    pub webhook_url: Option<String>,
    pub spool_dir: PathBuf,
    pub mail_from: Option<String>,
    pub mail_to: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            anchor_file: PathBuf::from(DEFAULT_ANCHOR_FILE),
            anchor_history: PathBuf::from(DEFAULT_ANCHOR_HISTORY),
            lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
            publish: PublishConfig {
                label: DEFAULT_LABEL.to_string(),
                interval_secs: 86_400,
            },
            transmit: TransmitConfig {
                kind: TransmitKind::Smtp,
                timeout_secs: DEFAULT_TRANSMIT_TIMEOUT_SECS,
                webhook_url: None,
                spool_dir: PathBuf::from("outbox"),
                mail_from: None,
                mail_to: None,
                smtp_host: None,
                smtp_port: DEFAULT_SMTP_PORT,
                smtp_user: None,
                smtp_pass: None,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration. A missing file is fine when `path` is the
    /// default; an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, LedgerError> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        info!("Loading configuration (file: {:?}, required: {})", file, required);

        let defaults = Self::default();
        let settings = Config::builder()
            .set_default("database_url", defaults.database_url.as_str())
            .and_then(|b| b.set_default("anchor_file", DEFAULT_ANCHOR_FILE))
            .and_then(|b| b.set_default("anchor_history", DEFAULT_ANCHOR_HISTORY))
            .and_then(|b| b.set_default("lock_file", DEFAULT_LOCK_FILE))
            .and_then(|b| b.set_default("publish.label", DEFAULT_LABEL))
            .and_then(|b| b.set_default("publish.interval_secs", 86_400_i64))
            .and_then(|b| b.set_default("transmit.kind", "smtp"))
            .and_then(|b| b.set_default("transmit.smtp_port", i64::from(DEFAULT_SMTP_PORT)))
            .and_then(|b| {
                b.set_default(
                    "transmit.timeout_secs",
                    DEFAULT_TRANSMIT_TIMEOUT_SECS as i64,
                )
            })
            .and_then(|b| b.set_default("transmit.spool_dir", "outbox"))
            .and_then(|b| b.set_default("server.host", defaults.server.host.as_str()))
            .and_then(|b| b.set_default("server.port", i64::from(defaults.server.port)))
            .map_err(|e| LedgerError::ConfigError(format!("Invalid default: {}", e)))?
            .add_source(File::from(file.as_path()).required(required))
            .add_source(
                Environment::with_prefix("LEDGER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LedgerError::ConfigError(format!("Failed to load {:?}: {}", file, e)))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| LedgerError::ConfigError(format!("Failed to parse configuration: {}", e)))?;

        config.validate()?;
        debug!(
            "Configuration: database {}, anchors {:?}/{:?}, transmit via {:?}",
            config.database_url, config.anchor_file, config.anchor_history, config.transmit.kind
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.database_url.trim().is_empty() {
            return Err(LedgerError::ConfigError("database_url is empty".to_string()));
        }
        if self.anchor_file == self.anchor_history {
            return Err(LedgerError::ConfigError(
                "anchor_file and anchor_history must be different files".to_string(),
            ));
        }
        if self.transmit.timeout_secs == 0 {
            return Err(LedgerError::ConfigError(
                "transmit.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.publish.interval_secs == 0 {
            return Err(LedgerError::ConfigError(
                "publish.interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn transmit_timeout(&self) -> Duration {
        Duration::from_secs(self.transmit.timeout_secs)
    }

    /// Filesystem path of the SQLite database, or `None` for in-memory URLs.
    pub fn database_path(&self) -> Option<PathBuf> {
        let rest = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))
            .unwrap_or(&self.database_url);
        let rest = rest.split('?').next().unwrap_or(rest);
        if rest.is_empty() || rest == ":memory:" {
            None
        } else {
            Some(PathBuf::from(rest))
        }
    }
}
