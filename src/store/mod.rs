//! Persistent SQLite store for users, the credit economy and lookup history.

mod backup;
mod economy;
mod lookups;
mod settings;
mod users;

pub use economy::{Code, CodeFilter, NewCode, RedeemError, ReferralError, normalize_code};
pub use lookups::{DailyCount, LookupRecord};
pub use settings::Setting;
pub use users::{BotStats, User};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    UserNotFound(i64),
    CodeNotFound(String),
    DuplicateCode(String),
    Io(std::io::Error),
    Archive(zip::result::ZipError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "database error: {e}"),
            Self::UserNotFound(id) => write!(f, "user {id} not found"),
            Self::CodeNotFound(code) => write!(f, "code {code} not found"),
            Self::DuplicateCode(code) => write!(f, "code {code} already exists"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Archive(e) => write!(f, "archive error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Archive(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<zip::result::ZipError> for StoreError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e)
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Timestamps are stored as fixed-width RFC 3339 strings so they sort lexically.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let db = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        db.init_schema()?;
        Ok(db)
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Self { conn: Mutex::new(Connection::open(path)?) };
        db.init_schema()?;

        let stats = db.stats()?;
        info!("Loaded database from {:?} ({} users, {} banned)", path, stats.total_users, stats.banned);
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run raw SQL against the store.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn().execute_batch(sql)?;
        Ok(())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT NOT NULL DEFAULT '',
                credits INTEGER NOT NULL DEFAULT 0
                    CHECK (credits >= 0 AND typeof(credits) = 'integer'),
                total_earned INTEGER NOT NULL DEFAULT 0 CHECK (typeof(total_earned) = 'integer'),
                referrals INTEGER NOT NULL DEFAULT 0,
                codes_claimed INTEGER NOT NULL DEFAULT 0,
                total_lookups INTEGER NOT NULL DEFAULT 0,
                is_banned INTEGER NOT NULL DEFAULT 0,
                is_admin INTEGER NOT NULL DEFAULT 0,
                joined_at TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS codes (
                code TEXT PRIMARY KEY,
                amount INTEGER NOT NULL CHECK (amount > 0),
                max_uses INTEGER NOT NULL CHECK (max_uses > 0),
                uses INTEGER NOT NULL DEFAULT 0 CHECK (uses <= max_uses),
                expires_at TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_by INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS redemptions (
                user_id INTEGER NOT NULL,
                code TEXT NOT NULL,
                redeemed_at TEXT NOT NULL,
                PRIMARY KEY (user_id, code)
            );

            CREATE TABLE IF NOT EXISTS referrals (
                referrer_id INTEGER NOT NULL,
                referred_id INTEGER NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lookups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                command TEXT NOT NULL,
                input TEXT NOT NULL,
                success INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS broadcasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                admin_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                delivered INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
            CREATE INDEX IF NOT EXISTS idx_users_last_seen ON users(last_seen);
            CREATE INDEX IF NOT EXISTS idx_lookups_user ON lookups(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_referrals_referrer ON referrals(referrer_id);
        "#)?;

        Ok(())
    }
}
