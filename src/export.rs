//! Point-in-time export of the controller's account list.
//!
//! Independent of the append-only outcome store: this is a snapshot of
//! whatever rows the controller is currently displaying, dumped to a
//! timestamped CSV on explicit operator request.

use crate::error::Result;
use crate::store::{csv_field, CSV_HEADER};
use std::fs;
use std::path::{Path, PathBuf};

/// One displayed account row.
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub email: String,
    pub password: String,
    pub status: String,
    pub timestamp: String,
}

/// Write `rows` to `dir/accounts_export_<timestamp>.csv` and return the
/// path. The directory is created if needed.
pub fn export_snapshot(rows: &[AccountRow], dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("accounts_export_{stamp}.csv"));

    let mut out = String::new();
    out.push_str(CSV_HEADER);
    out.push('\n');
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},\n",
            csv_field(&row.email),
            csv_field(&row.password),
            csv_field(&row.status),
            csv_field(&row.timestamp),
        ));
    }

    fs::write(&path, out)?;
    Ok(path)
}
