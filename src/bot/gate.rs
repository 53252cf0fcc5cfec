//! Checks a regular user must pass before the bot serves them.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::info;

use super::callbacks::CHECK_AGAIN;
use super::reply::Reply;
use super::telegram::Messenger;
use super::Context;
use crate::config::{Config, ForceChannel};
use crate::store::{Setting, StoreError};

#[derive(Debug, Clone)]
pub enum Gate {
    Pass,
    Banned,
    /// Private chats are off for regular users.
    PrivateOnly,
    /// Channels the user has not joined yet.
    MustJoin(Vec<ForceChannel>),
}

/// Run the gates for the caller. Staff always pass.
/// `private_rule` applies the group-only restriction.
pub async fn check<M: Messenger>(ctx: &Context<'_, M>, private_rule: bool) -> Result<Gate, StoreError> {
    if ctx.role.is_staff() {
        return Ok(Gate::Pass);
    }
    if ctx.user.is_banned {
        return Ok(Gate::Banned);
    }
    if private_rule && ctx.caller.private && !ctx.state.db.setting(Setting::PremiumForAll)? {
        return Ok(Gate::PrivateOnly);
    }

    let mut missing = Vec::new();
    for channel in &ctx.state.config.force_channels {
        // Membership that cannot be verified counts as not joined
        if !ctx.messenger.is_member(channel.id, ctx.caller.user_id).await.unwrap_or(false) {
            missing.push(channel.clone());
        }
    }

    if missing.is_empty() {
        Ok(Gate::Pass)
    } else {
        info!("User {} has not joined {} channel(s)", ctx.caller.id(), missing.len());
        Ok(Gate::MustJoin(missing))
    }
}

impl Gate {
    /// The rejection to send, or `None` if the gate passed.
    pub fn into_reply(self, config: &Config) -> Option<Reply> {
        match self {
            Gate::Pass => None,
            Gate::Banned => Some(Reply::text("🚫 You are banned from using this bot.")),
            Gate::PrivateOnly => Some(Reply::text(
                config
                    .private_redirect
                    .clone()
                    .unwrap_or_else(|| "🔒 This bot only works in our group chats.".to_string()),
            )),
            Gate::MustJoin(channels) => Some(
                Reply::text("📢 Please join our channel(s) to use this bot, then tap <b>Check again</b>.")
                    .with_keyboard(join_keyboard(&channels)),
            ),
        }
    }
}

fn join_keyboard(channels: &[ForceChannel]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = channels
        .iter()
        .enumerate()
        .map(|(i, channel)| vec![InlineKeyboardButton::url(format!("📢 Join channel {}", i + 1), channel.link.clone())])
        .collect();
    rows.push(vec![InlineKeyboardButton::callback("✅ Check again", CHECK_AGAIN)]);
    InlineKeyboardMarkup::new(rows)
}
