//! Credits, redeem codes and referrals.
//!
//! Every rule with an invariant runs inside a single statement or an
//! `IMMEDIATE` transaction: a code is redeemed at most once per user, `uses`
//! never passes `max_uses`, a user is referred at most once and balances
//! never go negative.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};
use std::fmt;
use tracing::info;

use super::{Database, Result, StoreError, timestamp};

/// A redeem code.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub code: String,
    pub amount: i64,
    pub max_uses: i64,
    pub uses: i64,
    pub expires_at: Option<String>,
    pub active: bool,
    pub created_by: i64,
    pub created_at: String,
}

impl Code {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.as_deref().is_some_and(|at| at <= timestamp(now).as_str())
    }
}

/// Parameters for a new code.
#[derive(Debug, Clone)]
pub struct NewCode {
    pub code: String,
    pub amount: i64,
    pub max_uses: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeFilter {
    All,
    Active,
    Inactive,
}

/// Why a redemption was rejected.
#[derive(Debug)]
pub enum RedeemError {
    UnknownCode,
    Inactive,
    Expired,
    AlreadyRedeemed,
    MaxUsesReached,
    Store(StoreError),
}

impl fmt::Display for RedeemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCode => write!(f, "invalid code"),
            Self::Inactive => write!(f, "code is no longer active"),
            Self::Expired => write!(f, "code has expired"),
            Self::AlreadyRedeemed => write!(f, "already redeemed"),
            Self::MaxUsesReached => write!(f, "max uses reached"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RedeemError {}

impl From<rusqlite::Error> for RedeemError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(e))
    }
}

/// Why a referral was not credited.
#[derive(Debug)]
pub enum ReferralError {
    SelfReferral,
    UnknownReferrer,
    AlreadyReferred,
    Store(StoreError),
}

impl fmt::Display for ReferralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfReferral => write!(f, "users cannot refer themselves"),
            Self::UnknownReferrer => write!(f, "referrer is not a known user"),
            Self::AlreadyReferred => write!(f, "user was already referred"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReferralError {}

impl From<rusqlite::Error> for ReferralError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(e))
    }
}

const CODE_COLUMNS: &str = "code, amount, max_uses, uses, expires_at, active, created_by, created_at";

fn code_from_row(row: &Row<'_>) -> rusqlite::Result<Code> {
    Ok(Code {
        code: row.get(0)?,
        amount: row.get(1)?,
        max_uses: row.get(2)?,
        uses: row.get(3)?,
        expires_at: row.get(4)?,
        active: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Codes are case-insensitive; they are stored upper-case.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl Database {
    // ==================== CREDITS ====================

    /// Add credits (counted as earned). Returns the new balance.
    pub fn add_credits(&self, user_id: i64, amount: i64) -> Result<i64> {
        let conn = self.conn();
        let balance = conn
            .query_row(
                "UPDATE users SET credits = credits + ?2, total_earned = total_earned + ?2
                 WHERE user_id = ?1 RETURNING credits",
                params![user_id, amount.max(0)],
                |row| row.get(0),
            )
            .optional()?;
        balance.ok_or(StoreError::UserNotFound(user_id))
    }

    /// Remove up to `amount` credits, stopping at zero. Returns the new balance.
    pub fn remove_credits(&self, user_id: i64, amount: i64) -> Result<i64> {
        let conn = self.conn();
        let balance = conn
            .query_row(
                "UPDATE users SET credits = MAX(0, credits - ?2) WHERE user_id = ?1 RETURNING credits",
                params![user_id, amount.max(0)],
                |row| row.get(0),
            )
            .optional()?;
        balance.ok_or(StoreError::UserNotFound(user_id))
    }

    pub fn set_credits(&self, user_id: i64, amount: i64) -> Result<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE users SET credits = ?2 WHERE user_id = ?1",
            params![user_id, amount.max(0)],
        )?;
        if updated == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    /// Take one credit if the balance allows it. Returns false when the balance is zero.
    pub fn deduct_credit(&self, user_id: i64) -> Result<bool> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE users SET credits = credits - 1 WHERE user_id = ?1 AND credits >= 1",
            params![user_id],
        )?;
        Ok(updated > 0)
    }

    /// Give back a credit taken by [`Self::deduct_credit`].
    pub fn refund_credit(&self, user_id: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute("UPDATE users SET credits = credits + 1 WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }

    /// Grant `amount` credits to every user. Returns how many users were credited.
    pub fn grant_all(&self, amount: i64) -> Result<usize> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE users SET credits = credits + ?1, total_earned = total_earned + ?1",
            params![amount.max(0)],
        )?;
        info!("🎁 Granted {} credits to {} users", amount, updated);
        Ok(updated)
    }

    // ==================== CODES ====================

    pub fn create_code(&self, new: &NewCode, now: DateTime<Utc>) -> Result<()> {
        let code = normalize_code(&new.code);
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO codes (code, amount, max_uses, uses, expires_at, active, created_by, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, 1, ?5, ?6)",
            params![
                code,
                new.amount,
                new.max_uses,
                new.expires_at.map(timestamp),
                new.created_by,
                timestamp(now)
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::DuplicateCode(code));
        }
        info!("🎫 Code created: {} ({} credits, {} uses)", code, new.amount, new.max_uses);
        Ok(())
    }

    pub fn get_code(&self, code: &str) -> Result<Option<Code>> {
        let conn = self.conn();
        let found = conn
            .query_row(
                &format!("SELECT {CODE_COLUMNS} FROM codes WHERE code = ?1"),
                params![normalize_code(code)],
                code_from_row,
            )
            .optional()?;
        Ok(found)
    }

    pub fn list_codes(&self, filter: CodeFilter) -> Result<Vec<Code>> {
        let sql = match filter {
            CodeFilter::All => format!("SELECT {CODE_COLUMNS} FROM codes ORDER BY created_at DESC, code"),
            CodeFilter::Active => {
                format!("SELECT {CODE_COLUMNS} FROM codes WHERE active = 1 ORDER BY created_at DESC, code")
            }
            CodeFilter::Inactive => {
                format!("SELECT {CODE_COLUMNS} FROM codes WHERE active = 0 ORDER BY created_at DESC, code")
            }
        };
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let codes = stmt
            .query_map([], code_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(codes)
    }

    pub fn deactivate_code(&self, code: &str) -> Result<()> {
        let code = normalize_code(code);
        let conn = self.conn();
        let updated = conn.execute("UPDATE codes SET active = 0 WHERE code = ?1", params![code])?;
        if updated == 0 {
            return Err(StoreError::CodeNotFound(code));
        }
        info!("Code deactivated: {}", code);
        Ok(())
    }

    /// Number of distinct users who redeemed `code`.
    pub fn code_redeemers(&self, code: &str) -> Result<i64> {
        let conn = self.conn();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM redemptions WHERE code = ?1",
            params![normalize_code(code)],
            |row| row.get(0),
        )?)
    }

    /// Active codes whose expiry has passed.
    pub fn expired_codes(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT code FROM codes WHERE active = 1 AND expires_at IS NOT NULL AND expires_at <= ?1 ORDER BY code",
        )?;
        let codes = stmt
            .query_map(params![timestamp(now)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(codes)
    }

    /// Deactivate every expired code. Returns how many were deactivated.
    pub fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE codes SET active = 0 WHERE active = 1 AND expires_at IS NOT NULL AND expires_at <= ?1",
            params![timestamp(now)],
        )?;
        Ok(updated)
    }

    /// Redeem `code` for `user_id`. Returns the credits granted.
    pub fn redeem_code(&self, user_id: i64, code: &str, now: DateTime<Utc>) -> Result<i64, RedeemError> {
        let code = normalize_code(code);
        let now = timestamp(now);
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (amount, active, expires_at): (i64, bool, Option<String>) = tx
            .query_row(
                "SELECT amount, active, expires_at FROM codes WHERE code = ?1",
                params![code],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
            .ok_or(RedeemError::UnknownCode)?;

        if !active {
            return Err(RedeemError::Inactive);
        }
        if expires_at.as_deref().is_some_and(|at| at <= now.as_str()) {
            return Err(RedeemError::Expired);
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO redemptions (user_id, code, redeemed_at) VALUES (?1, ?2, ?3)",
            params![user_id, code, now],
        )?;
        if inserted == 0 {
            return Err(RedeemError::AlreadyRedeemed);
        }

        let claimed = tx.execute(
            "UPDATE codes SET uses = uses + 1 WHERE code = ?1 AND uses < max_uses",
            params![code],
        )?;
        if claimed == 0 {
            return Err(RedeemError::MaxUsesReached);
        }

        let credited = tx.execute(
            "UPDATE users SET credits = credits + ?2, total_earned = total_earned + ?2,
                codes_claimed = codes_claimed + 1
             WHERE user_id = ?1",
            params![user_id, amount],
        )?;
        if credited == 0 {
            return Err(RedeemError::Store(StoreError::UserNotFound(user_id)));
        }

        tx.commit()?;
        info!("🎫 User {} redeemed {} for {} credits", user_id, code, amount);
        Ok(amount)
    }

    // ==================== REFERRALS ====================

    /// Record that `referrer_id` brought in `referred_id` and credit the referrer.
    pub fn record_referral(
        &self,
        referrer_id: i64,
        referred_id: i64,
        credit: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ReferralError> {
        if referrer_id == referred_id {
            return Err(ReferralError::SelfReferral);
        }

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let referrer_known = tx
            .query_row("SELECT 1 FROM users WHERE user_id = ?1", params![referrer_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !referrer_known {
            return Err(ReferralError::UnknownReferrer);
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO referrals (referrer_id, referred_id, created_at) VALUES (?1, ?2, ?3)",
            params![referrer_id, referred_id, timestamp(now)],
        )?;
        if inserted == 0 {
            return Err(ReferralError::AlreadyReferred);
        }

        tx.execute(
            "UPDATE users SET referrals = referrals + 1, credits = credits + ?2, total_earned = total_earned + ?2
             WHERE user_id = ?1",
            params![referrer_id, credit.max(0)],
        )?;

        tx.commit()?;
        info!("🤝 Referral recorded: {} -> {}", referrer_id, referred_id);
        Ok(())
    }

    pub fn referral_count(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM referrals WHERE referrer_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?)
    }
}
