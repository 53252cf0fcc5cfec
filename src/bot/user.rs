//! Self-service commands available to everyone.

use teloxide::types::ChatId;
use teloxide::utils::html;
use tracing::{debug, info, warn};

use super::command::Args;
use super::reply::Reply;
use super::telegram::Messenger;
use super::{Context, HandlerResult};
use crate::auth::Role;
use crate::store::{RedeemError, ReferralError, normalize_code};

const REFERRAL_PREFIX: &str = "ref_";

/// Credit the referrer named in a `/start ref_<id>` payload.
/// Only called for users created by this very `/start`.
pub async fn apply_referral<M: Messenger>(ctx: &Context<'_, M>, args: &[String]) {
    let Some(referrer_id) = args
        .first()
        .and_then(|payload| payload.strip_prefix(REFERRAL_PREFIX))
        .and_then(|id| id.parse::<i64>().ok())
    else {
        return;
    };

    let credit = ctx.state.config.referral_credit;
    match ctx.state.db.record_referral(referrer_id, ctx.caller.id(), credit, ctx.now) {
        Ok(()) => {
            let notice = format!(
                "🎉 {} joined using your referral link! +{credit} credits",
                ctx.caller.display_name()
            );
            if let Err(e) = ctx.messenger.send_text(ChatId(referrer_id), &notice).await {
                debug!("Referral notice to {referrer_id} not delivered: {e}");
            }
        }
        Err(ReferralError::Store(e)) => warn!("Failed to record referral {referrer_id} -> {}: {e}", ctx.caller.id()),
        Err(e) => info!("Referral {referrer_id} -> {} rejected: {e}", ctx.caller.id()),
    }
}

pub fn start<M: Messenger>(ctx: &Context<'_, M>) -> Reply {
    Reply::text(format!(
        "👋 Welcome, {}!\n\n💳 Credits: <b>{}</b>\n\nEvery lookup costs 1 credit. Send /help to see what I can do.",
        ctx.caller.display_name(),
        ctx.user.credits
    ))
}

pub fn help<M: Messenger>(ctx: &Context<'_, M>) -> Reply {
    let mut lines = vec!["<b>🔍 Lookups</b> (1 credit each)".to_string()];
    for endpoint in ctx.state.config.lookups.values() {
        let mut line = format!("/{} &lt;value&gt;", endpoint.name);
        if !endpoint.description.is_empty() {
            line.push_str(&format!(" - {}", html::escape(&endpoint.description)));
        }
        lines.push(line);
    }

    lines.extend(
        [
            "",
            "<b>👤 Account</b>",
            "/myprofile - your credits and stats",
            "/refer - your referral link",
            "/redeem &lt;code&gt; - redeem a code",
            "/buy - buy credits",
        ]
        .map(String::from),
    );

    if ctx.role.is_staff() {
        lines.extend(
            [
                "",
                "<b>🛡 Admin</b>",
                "/stats /lookupstats /dailystats /backup",
                "/broadcast /dm",
                "/gift /bulkgift /removecredits /resetcredits",
                "/ban /unban /deleteuser",
                "/users /searchuser /recentusers /userlookups",
                "/leaderboard /premiumusers /lowcreditusers /inactiveusers /topref",
                "/gencode /customcode /listcodes /activecodes /inactivecodes",
                "/deactivatecode /codestats /checkexpired /cleanexpired",
            ]
            .map(String::from),
        );
    }

    if ctx.role == Role::Owner {
        lines.extend(
            [
                "",
                "<b>👑 Owner</b>",
                "/addadmin /removeadmin /listadmins /settings",
                "/premiumforallusers /freemiumforallusers /freecredits /fulldbbackup",
            ]
            .map(String::from),
        );
    }

    Reply::lines(lines)
}

pub fn my_profile<M: Messenger>(ctx: &Context<'_, M>) -> Reply {
    let user = &ctx.user;
    Reply::lines([
        "<b>👤 Your profile</b>".to_string(),
        format!("ID: <code>{}</code>", user.user_id),
        format!("Name: {}", html::escape(&user.first_name)),
        format!("💳 Credits: <b>{}</b>", user.credits),
        format!("Earned in total: {}", user.total_earned),
        format!("Referrals: {}", user.referrals),
        format!("Codes redeemed: {}", user.codes_claimed),
        format!("Lookups: {}", user.total_lookups),
        format!("Joined: {}", date_part(&user.joined_at)),
    ])
}

pub fn refer<M: Messenger>(ctx: &Context<'_, M>) -> Reply {
    Reply::text(format!(
        "🤝 Invite friends and earn <b>{}</b> credits for each one who joins.\n\n\
         Your link:\nhttps://t.me/{}?start={REFERRAL_PREFIX}{}\n\nReferred so far: {}",
        ctx.state.config.referral_credit,
        ctx.state.bot_username,
        ctx.caller.id(),
        ctx.user.referrals
    ))
}

pub fn redeem<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let code = args.text(0)?;
    match ctx.state.db.redeem_code(ctx.caller.id(), code, ctx.now) {
        Ok(amount) => {
            let balance = ctx.state.db.require_user(ctx.caller.id())?.credits;
            Ok(Reply::text(format!(
                "✅ Code redeemed! +{amount} credits\n💳 Balance: <b>{balance}</b>"
            )))
        }
        Err(RedeemError::Store(e)) => Err(e.into()),
        Err(e) => Ok(Reply::text(format!(
            "❌ Could not redeem <code>{}</code>: {e}",
            html::escape(&normalize_code(code))
        ))),
    }
}

pub fn buy<M: Messenger>(ctx: &Context<'_, M>) -> Reply {
    match &ctx.state.config.buy_contact {
        Some(contact) => Reply::text(format!("💰 To buy credits, contact {}", html::escape(contact))),
        None => Reply::text("💰 To buy credits, contact the bot owner."),
    }
}

/// `YYYY-MM-DD` of a stored timestamp.
pub(crate) fn date_part(timestamp: &str) -> &str {
    timestamp.get(..10).unwrap_or(timestamp)
}
