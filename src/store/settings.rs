use rusqlite::{OptionalExtension, params};
use tracing::info;

use super::{Database, Result};

/// Runtime toggles the owner can flip without a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    /// Serve private chats too, not just groups.
    PremiumForAll,
    /// New users start with the default credit balance.
    FreeCreditsOnJoin,
}

impl Setting {
    fn key(self) -> &'static str {
        match self {
            Setting::PremiumForAll => "premium_for_all",
            Setting::FreeCreditsOnJoin => "free_credits_on_join",
        }
    }
}

impl Database {
    /// Store `value` only if the setting was never set.
    pub fn seed_setting(&self, setting: Setting, value: bool) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
            params![setting.key(), value.to_string()],
        )?;
        Ok(())
    }

    pub fn set_setting(&self, setting: Setting, value: bool) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![setting.key(), value.to_string()],
        )?;
        info!("⚙️ Setting {} = {}", setting.key(), value);
        Ok(())
    }

    /// Read a toggle; unset toggles are off.
    pub fn setting(&self, setting: Setting) -> Result<bool> {
        let conn = self.conn();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![setting.key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.is_some_and(|v| v == "true"))
    }
}
