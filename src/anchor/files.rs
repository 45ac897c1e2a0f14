//! Anchor Files
//!
//! The current-state record (overwritten on every publish) and the
//! append-only history trail, both reached through an explicit
//! [`AnchorStore`] handle.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::anchor::record::{is_valid_tip_hash, Anchor, AnchorHistoryEntry};
use crate::error::{LedgerError, Result};

/// Paths of the two anchor files.
#[derive(Debug, Clone)]
pub struct AnchorStore {
    anchor_file: PathBuf,
    history_file: PathBuf,
}

impl AnchorStore {
    pub fn new(anchor_file: impl Into<PathBuf>, history_file: impl Into<PathBuf>) -> Self {
        Self {
            anchor_file: anchor_file.into(),
            history_file: history_file.into(),
        }
    }

    pub fn anchor_file(&self) -> &Path {
        &self.anchor_file
    }

    pub fn history_file(&self) -> &Path {
        &self.history_file
    }

    /// Replace the current-state record. The new content is written to a
    /// sibling temp file and renamed over the old one.
    pub fn write_anchor(&self, latest_hash: &str, note: &str, timestamp: &str) -> Result<Anchor> {
        check_hash(latest_hash)?;
        let anchor = Anchor::new(latest_hash, timestamp, note);

        ensure_parent(&self.anchor_file)?;
        let mut tmp = self.anchor_file.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(anchor.to_record().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.anchor_file)?;

        info!("Wrote anchor {} to {}", latest_hash, self.anchor_file.display());
        Ok(anchor)
    }

    /// Append one line to the history trail. Existing lines are never touched.
    pub fn append_history(
        &self,
        timestamp: &str,
        hash: &str,
        note: &str,
    ) -> Result<AnchorHistoryEntry> {
        check_hash(hash)?;
        let entry = AnchorHistoryEntry::new(timestamp, hash, note);

        ensure_parent(&self.history_file)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_file)?;
        writeln!(file, "{}", entry.to_line())?;
        file.sync_all()?;

        debug!("Appended anchor history line to {}", self.history_file.display());
        Ok(entry)
    }

    pub fn read_anchor(&self) -> Result<Anchor> {
        let source = self.anchor_file.display().to_string();
        let content = match fs::read_to_string(&self.anchor_file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(LedgerError::anchor_parse(source, "anchor file not found"));
            }
            Err(e) => return Err(LedgerError::anchor_parse(source, e.to_string())),
        };
        Anchor::parse(&content, &source)
    }

    /// All history entries, oldest first. A missing trail is empty.
    pub fn read_history(&self) -> Result<Vec<AnchorHistoryEntry>> {
        let content = match fs::read_to_string(&self.history_file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = AnchorHistoryEntry::parse_line(line).ok_or_else(|| {
                LedgerError::anchor_parse(
                    self.history_file.display().to_string(),
                    format!("malformed history line {}", line_num + 1),
                )
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn check_hash(hash: &str) -> Result<()> {
    if is_valid_tip_hash(hash) {
        Ok(())
    } else {
        Err(LedgerError::validation(format!(
            "not a ledger tip hash: {:?}",
            hash
        )))
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
