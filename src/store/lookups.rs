use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{Database, Result, timestamp};

/// One entry of a user's lookup history.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRecord {
    pub command: String,
    pub input: String,
    pub success: bool,
    pub created_at: String,
}

/// Lookups per command on one UTC day.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyCount {
    pub date: String,
    pub command: String,
    pub count: i64,
}

impl Database {
    /// Log a lookup attempt. Successful lookups also count towards the user's total.
    pub fn log_lookup(
        &self,
        user_id: i64,
        command: &str,
        input: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO lookups (user_id, command, input, success, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, command, input, success, timestamp(now)],
        )?;
        if success {
            tx.execute(
                "UPDATE users SET total_lookups = total_lookups + 1 WHERE user_id = ?1",
                params![user_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Most recent lookups of a user, newest first.
    pub fn user_lookups(&self, user_id: i64, limit: usize) -> Result<Vec<LookupRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT command, input, success, created_at FROM lookups
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![user_id, limit as i64], |row| {
                Ok(LookupRecord {
                    command: row.get(0)?,
                    input: row.get(1)?,
                    success: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// (total, successful) lookups ever made.
    pub fn lookup_totals(&self) -> Result<(i64, i64)> {
        let conn = self.conn();
        Ok(conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM lookups",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?)
    }

    /// Lookup counts per command, busiest first.
    pub fn lookups_by_command(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT command, COUNT(*) AS n FROM lookups GROUP BY command ORDER BY n DESC, command",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Per-day, per-command lookup counts since `since`, newest day first.
    pub fn daily_lookups(&self, since: DateTime<Utc>) -> Result<Vec<DailyCount>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT substr(created_at, 1, 10) AS day, command, COUNT(*) FROM lookups
             WHERE created_at >= ?1 GROUP BY day, command ORDER BY day DESC, command",
        )?;
        let rows = stmt
            .query_map(params![timestamp(since)], |row| {
                Ok(DailyCount {
                    date: row.get(0)?,
                    command: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn log_broadcast(
        &self,
        admin_id: i64,
        message: &str,
        delivered: usize,
        failed: usize,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO broadcasts (admin_id, message, delivered, failed, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![admin_id, message, delivered as i64, failed as i64, timestamp(now)],
        )?;
        Ok(())
    }

    pub fn broadcast_count(&self) -> Result<i64> {
        let conn = self.conn();
        Ok(conn.query_row("SELECT COUNT(*) FROM broadcasts", [], |row| row.get(0))?)
    }
}
