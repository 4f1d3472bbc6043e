//! Append-only allocation record
//!
//! One JSON line per processed request. Best-effort: a failed write is
//! logged and the request is still answered.

use crate::core::model::Request;
use crate::core::pool::AllocationOutcome;
use crate::net::PeerId;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// One journal line
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRecord<'a> {
    pub time: String,
    pub peer: String,
    pub request: &'a Request,
    pub outcome: AllocationOutcome,
    pub denied: bool,
    pub semester: u32,
    pub role: &'static str,
}

impl<'a> JournalRecord<'a> {
    pub fn new(
        peer: PeerId,
        request: &'a Request,
        outcome: AllocationOutcome,
        semester: u32,
        role: &'static str,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            time: now
                .format(&Rfc3339)
                .unwrap_or_else(|_| now.unix_timestamp().to_string()),
            peer: peer.to_string(),
            request,
            outcome,
            denied: outcome.is_denied(),
            semester,
            role,
        }
    }
}

pub struct EventJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventJournal {
    /// Open `path` for appending, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line
    pub fn append(&self, record: &JournalRecord<'_>) -> io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.lock().write_all(line.as_bytes())
    }

    /// Append, logging instead of failing
    pub fn record(&self, record: &JournalRecord<'_>) {
        if let Err(e) = self.append(record) {
            tracing::warn!(target: "server", path = %self.path.display(), error = %e, "Journal write failed");
        }
    }
}
