use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::info;

use super::{Database, Result, StoreError, timestamp};

/// A bot user.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub credits: i64,
    pub total_earned: i64,
    pub referrals: i64,
    pub codes_claimed: i64,
    pub total_lookups: i64,
    pub is_banned: bool,
    pub is_admin: bool,
    pub joined_at: String,
    pub last_seen: String,
}

/// Aggregate numbers for /stats.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotStats {
    pub total_users: i64,
    pub banned: i64,
    pub admins: i64,
    pub total_credits: i64,
}

pub(super) const USER_COLUMNS: &str = "user_id, username, first_name, credits, total_earned, referrals, \
     codes_claimed, total_lookups, is_banned, is_admin, joined_at, last_seen";

pub(super) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        credits: row.get(3)?,
        total_earned: row.get(4)?,
        referrals: row.get(5)?,
        codes_claimed: row.get(6)?,
        total_lookups: row.get(7)?,
        is_banned: row.get(8)?,
        is_admin: row.get(9)?,
        joined_at: row.get(10)?,
        last_seen: row.get(11)?,
    })
}

/// Match `%`, `_` and `\` literally in a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Database {
    /// Record that a user interacted with the bot. Returns true if the user is new.
    pub fn touch_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        first_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.touch_user_with_bonus(user_id, username, first_name, 0, now)
    }

    /// Like [`Self::touch_user`], but a user created by this call starts with
    /// `bonus` credits, written by the same insert.
    pub fn touch_user_with_bonus(
        &self,
        user_id: i64,
        username: Option<&str>,
        first_name: &str,
        bonus: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn();
        let now = timestamp(now);

        let created = conn.execute(
            "INSERT OR IGNORE INTO users (user_id, username, first_name, credits, total_earned, joined_at, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?5)",
            params![user_id, username, first_name, bonus.max(0), now],
        )? > 0;

        if !created {
            conn.execute(
                "UPDATE users SET username = ?2, first_name = ?3, last_seen = ?4 WHERE user_id = ?1",
                params![user_id, username, first_name, now],
            )?;
        }

        Ok(created)
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.conn();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn require_user(&self, user_id: i64) -> Result<User> {
        self.get_user(user_id)?.ok_or(StoreError::UserNotFound(user_id))
    }

    fn query_users(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let users = stmt
            .query_map(params, user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn all_users(&self) -> Result<Vec<User>> {
        self.query_users(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY user_id"), [])
    }

    /// Ids of every user that may receive a broadcast.
    pub fn broadcast_recipients(&self) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT user_id FROM users WHERE is_banned = 0 ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    pub fn count_users(&self) -> Result<i64> {
        let conn = self.conn();
        Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    /// One page of users, most recently seen first. Pages start at 1.
    pub fn users_page(&self, page: usize, per_page: usize) -> Result<Vec<User>> {
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.query_users(
            &format!("SELECT {USER_COLUMNS} FROM users ORDER BY last_seen DESC, user_id LIMIT ?1 OFFSET ?2"),
            params![per_page as i64, offset],
        )
    }

    /// Match against id, username or first name.
    pub fn search_users(&self, query: &str, limit: usize) -> Result<Vec<User>> {
        let pattern = format!("%{}%", escape_like(query.trim().trim_start_matches('@')));
        self.query_users(
            &format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE CAST(user_id AS TEXT) LIKE ?1 ESCAPE '\\'
                    OR username LIKE ?1 ESCAPE '\\'
                    OR first_name LIKE ?1 ESCAPE '\\'
                 ORDER BY user_id LIMIT ?2"
            ),
            params![pattern, limit as i64],
        )
    }

    /// Users who joined at or after `since`, newest first.
    pub fn recent_users(&self, since: DateTime<Utc>) -> Result<Vec<User>> {
        self.query_users(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE joined_at >= ?1 ORDER BY joined_at DESC"),
            params![timestamp(since)],
        )
    }

    /// Users not seen since `cutoff`, longest idle first.
    pub fn inactive_users(&self, cutoff: DateTime<Utc>) -> Result<Vec<User>> {
        self.query_users(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE last_seen < ?1 ORDER BY last_seen ASC"),
            params![timestamp(cutoff)],
        )
    }

    pub fn leaderboard(&self, limit: usize) -> Result<Vec<User>> {
        self.query_users(
            &format!("SELECT {USER_COLUMNS} FROM users ORDER BY credits DESC, user_id LIMIT ?1"),
            params![limit as i64],
        )
    }

    pub fn users_with_credits_at_least(&self, threshold: i64) -> Result<Vec<User>> {
        self.query_users(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE credits >= ?1 ORDER BY credits DESC, user_id"),
            params![threshold],
        )
    }

    pub fn users_with_credits_below(&self, threshold: i64) -> Result<Vec<User>> {
        self.query_users(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE credits < ?1 ORDER BY credits ASC, user_id"),
            params![threshold],
        )
    }

    pub fn top_referrers(&self, limit: usize) -> Result<Vec<User>> {
        self.query_users(
            &format!(
                "SELECT {USER_COLUMNS} FROM users WHERE referrals > 0
                 ORDER BY referrals DESC, user_id LIMIT ?1"
            ),
            params![limit as i64],
        )
    }

    /// Ban or unban. Banning an unknown id creates a placeholder row so the ban sticks.
    pub fn set_banned(&self, user_id: i64, banned: bool, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        let now = timestamp(now);
        if banned {
            conn.execute(
                "INSERT INTO users (user_id, is_banned, joined_at, last_seen) VALUES (?1, 1, ?2, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET is_banned = 1",
                params![user_id, now],
            )?;
            info!("🚫 User banned: {}", user_id);
        } else {
            conn.execute("UPDATE users SET is_banned = 0 WHERE user_id = ?1", params![user_id])?;
            info!("User unbanned: {}", user_id);
        }
        Ok(())
    }

    pub fn is_banned(&self, user_id: i64) -> Result<bool> {
        let conn = self.conn();
        let banned = conn
            .query_row("SELECT is_banned FROM users WHERE user_id = ?1", params![user_id], |row| row.get(0))
            .optional()?;
        Ok(banned.unwrap_or(false))
    }

    /// Grant or revoke the stored admin flag.
    pub fn set_admin(&self, user_id: i64, admin: bool, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        if admin {
            conn.execute(
                "INSERT INTO users (user_id, is_admin, joined_at, last_seen) VALUES (?1, 1, ?2, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET is_admin = 1",
                params![user_id, timestamp(now)],
            )?;
        } else {
            conn.execute("UPDATE users SET is_admin = 0 WHERE user_id = ?1", params![user_id])?;
        }
        info!("Admin flag for {} set to {}", user_id, admin);
        Ok(())
    }

    pub fn stored_admins(&self) -> Result<Vec<User>> {
        self.query_users(&format!("SELECT {USER_COLUMNS} FROM users WHERE is_admin = 1 ORDER BY user_id"), [])
    }

    /// Remove a user row. Redemption and referral history is kept.
    pub fn delete_user(&self, user_id: i64) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM users WHERE user_id = ?1", params![user_id])? > 0;
        if deleted {
            info!("🗑️ User deleted: {}", user_id);
        }
        Ok(deleted)
    }

    pub fn stats(&self) -> Result<BotStats> {
        let conn = self.conn();
        let stats = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_banned), 0), COALESCE(SUM(is_admin), 0), COALESCE(SUM(credits), 0)
             FROM users",
            [],
            |row| {
                Ok(BotStats {
                    total_users: row.get(0)?,
                    banned: row.get(1)?,
                    admins: row.get(2)?,
                    total_credits: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }
}
