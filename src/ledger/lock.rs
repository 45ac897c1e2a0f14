//! Writer Lock
//!
//! The ledger is a single-writer structure: two appends that read the same
//! tip would fork the chain, and only the verifier could notice afterwards.
//! Every writer therefore holds a [`WriterGuard`] obtained from a
//! [`WriterLock`] supplied by the deployment.

use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{LedgerError, Result};

/// Exclusive ownership of the ledger's write side. Released on drop.
pub struct WriterGuard {
    _held: Box<dyn Send + Sync>,
}

impl WriterGuard {
    fn new(held: impl Send + Sync + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

#[async_trait]
pub trait WriterLock: Send + Sync {
    async fn acquire(&self) -> Result<WriterGuard>;
}

/// Serializes writers inside one process.
#[derive(Clone, Default)]
pub struct InProcessLock {
    inner: Arc<Mutex<()>>,
}

impl InProcessLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WriterLock for InProcessLock {
    async fn acquire(&self) -> Result<WriterGuard> {
        let guard = self.inner.clone().lock_owned().await;
        Ok(WriterGuard::new(guard))
    }
}

/// Serializes writers across processes sharing a filesystem. The lock file
/// is created exclusively and removed when the guard drops; a leftover file
/// from a crashed writer has to be removed by an operator.
#[derive(Clone, Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_create(&self) -> Result<LockFileGuard> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                file.sync_all()?;
                debug!("Acquired writer lock {}", self.path.display());
                Ok(LockFileGuard {
                    path: self.path.clone(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&self.path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                Err(LedgerError::LockUnavailable(format!(
                    "{} is held (pid {}); remove it only if that writer is gone",
                    self.path.display(),
                    if holder.is_empty() { "unknown" } else { holder.as_str() }
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl WriterLock for LockFile {
    async fn acquire(&self) -> Result<WriterGuard> {
        Ok(WriterGuard::new(self.try_create()?))
    }
}

struct LockFileGuard {
    path: PathBuf,
}

impl Drop for LockFileGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release writer lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released writer lock {}", self.path.display());
        }
    }
}
