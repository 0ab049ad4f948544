//! Append-only outcome store with full-copy backup replication.
//!
//! One row per terminal attempt: `email,password,status,timestamp,extra_info`.
//! Rows are flushed and forced to storage before the call returns, then the
//! whole primary file is copied over the backup. Rows are never mutated or
//! deleted; the store guarantees durability, not idempotence.

use crate::error::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CSV_HEADER: &str = "email,password,status,timestamp,extra_info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    pub email: String,
    pub password: String,
    pub status: OutcomeStatus,
    pub timestamp: String,
    pub extra_info: Option<String>,
}

impl OutcomeRecord {
    pub fn new(
        email: &str,
        password: &str,
        status: OutcomeStatus,
        extra_info: Option<String>,
    ) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            status,
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            extra_info,
        }
    }

    fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{}",
            csv_field(&self.email),
            csv_field(&self.password),
            self.status.as_str(),
            csv_field(&self.timestamp),
            csv_field(self.extra_info.as_deref().unwrap_or("")),
        )
    }
}

/// Quote a CSV field when it contains a comma, quote, or newline.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub struct OutcomeStore {
    primary: PathBuf,
    backup: PathBuf,
}

impl OutcomeStore {
    pub fn new(primary: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            backup: backup.into(),
        }
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    /// Append one record durably, then mirror the primary over the backup.
    ///
    /// On error the caller must assume no durable record was made. Two
    /// identical calls append two rows; deduplication is the caller's
    /// business.
    pub fn record(&self, record: &OutcomeRecord) -> Result<()> {
        // Header decision is by file existence, not content inspection.
        let write_header = !self.primary.exists();

        if let Some(parent) = self.primary.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.primary)?;

        if write_header {
            writeln!(file, "{CSV_HEADER}")?;
        }
        writeln!(file, "{}", record.to_csv_row())?;
        file.flush()?;
        // Durability before acknowledging: the row must survive a crash
        // before we touch the backup.
        file.sync_all()?;

        fs::copy(&self.primary, &self.backup)?;
        Ok(())
    }
}
