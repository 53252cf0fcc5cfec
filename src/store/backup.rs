//! CSV export and full database archives.

use std::io::{Cursor, Write};
use std::path::Path;

use chrono::Utc;
use rusqlite::params;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;

use super::{Database, Result};

const USERS_CSV_HEADER: &str = "user_id,username,first_name,credits,total_earned,referrals,\
codes_claimed,total_lookups,is_banned,is_admin,joined_at,last_seen";

/// Quote a CSV field when it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl Database {
    /// All users as CSV, one row per user.
    pub fn users_csv(&self) -> Result<String> {
        let users = self.all_users()?;
        let mut out = String::from(USERS_CSV_HEADER);
        out.push('\n');

        for u in &users {
            let fields = [
                u.user_id.to_string(),
                csv_field(u.username.as_deref().unwrap_or("")),
                csv_field(&u.first_name),
                u.credits.to_string(),
                u.total_earned.to_string(),
                u.referrals.to_string(),
                u.codes_claimed.to_string(),
                u.total_lookups.to_string(),
                u8::from(u.is_banned).to_string(),
                u8::from(u.is_admin).to_string(),
                u.joined_at.clone(),
                u.last_seen.clone(),
            ];
            out.push_str(&fields.join(","));
            out.push('\n');
        }

        Ok(out)
    }

    /// Write a consistent copy of the whole database to `dest`.
    pub fn snapshot_to(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            std::fs::remove_file(dest)?;
        }
        let conn = self.conn();
        conn.execute("VACUUM INTO ?1", params![dest.to_string_lossy().into_owned()])?;
        Ok(())
    }

    /// Zip archive holding a database snapshot and the users CSV.
    /// `scratch_dir` holds the temporary snapshot file.
    pub fn full_backup(&self, scratch_dir: &Path) -> Result<Vec<u8>> {
        std::fs::create_dir_all(scratch_dir)?;
        let snapshot_path = scratch_dir.join(format!("snapshot-{}.db", Utc::now().timestamp_millis()));
        self.snapshot_to(&snapshot_path)?;
        let snapshot = std::fs::read(&snapshot_path);
        if let Err(e) = std::fs::remove_file(&snapshot_path) {
            warn!("Failed to remove snapshot {:?}: {e}", snapshot_path);
        }
        let snapshot = snapshot?;
        let csv = self.users_csv()?;

        let mut archive = zip::ZipWriter::new(Cursor::new(Vec::new()));
        archive.start_file("lookupbot.db", SimpleFileOptions::default())?;
        archive.write_all(&snapshot)?;
        archive.start_file("users.csv", SimpleFileOptions::default())?;
        archive.write_all(csv.as_bytes())?;
        let bytes = archive.finish()?.into_inner();

        info!("💾 Full backup built ({} bytes)", bytes.len());
        Ok(bytes)
    }
}
