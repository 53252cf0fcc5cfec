//! Admin commands: user management, credits, codes and statistics.

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;
use teloxide::types::{ChatId, UserId};
use teloxide::utils::html;
use tracing::info;

use super::broadcast;
use super::command::{ArgError, Args, Command, generate_code, rest_after};
use super::reply::Reply;
use super::telegram::Messenger;
use super::user::date_part;
use super::{Context, HandlerResult};
use crate::store::{Code, CodeFilter, NewCode, StoreError, User};

/// Balance at which a user shows up in /premiumusers.
const PREMIUM_THRESHOLD: i64 = 100;
/// Balance below which a user shows up in /lowcreditusers.
const LOW_CREDIT_THRESHOLD: i64 = 10;
const USERS_PER_PAGE: usize = 20;
const MAX_LIST_LIMIT: usize = 50;
/// Longest look-back window for /recentusers and /inactiveusers.
const MAX_DAYS: usize = 3650;

static CUSTOM_CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,32}$").expect("static regex"));

fn user_name(user: &User) -> String {
    match &user.username {
        Some(username) => format!("@{}", html::escape(username)),
        None if user.first_name.is_empty() => "(unknown)".to_string(),
        None => html::escape(&user.first_name),
    }
}

fn user_line(user: &User) -> String {
    let mut line = format!("<code>{}</code> {} · 💳 {}", user.user_id, user_name(user), user.credits);
    if user.is_admin {
        line.push_str(" · 🛡");
    }
    if user.is_banned {
        line.push_str(" · 🚫");
    }
    line
}

fn user_list(title: String, users: &[User], line: impl Fn(&User) -> String) -> Reply {
    if users.is_empty() {
        return Reply::text(format!("{title}\n\nNobody yet."));
    }
    Reply::lines(std::iter::once(title).chain(std::iter::once(String::new())).chain(users.iter().map(line)))
}

fn code_line(code: &Code) -> String {
    let status = if code.active { "✅" } else { "⛔" };
    let mut line = format!(
        "{status} <code>{}</code> · {} credits · {}/{} used",
        html::escape(&code.code),
        code.amount,
        code.uses,
        code.max_uses
    );
    if let Some(expires_at) = &code.expires_at {
        line.push_str(&format!(" · expires {expires_at}"));
    }
    line
}

// ==================== STATS ====================

pub fn stats<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let db = &ctx.state.db;
    let stats = db.stats()?;
    let (lookups, successful) = db.lookup_totals()?;
    let active_codes = db.list_codes(CodeFilter::Active)?.len();

    Ok(Reply::lines([
        "<b>📊 Bot statistics</b>".to_string(),
        format!("Users: {}", stats.total_users),
        format!("Banned: {}", stats.banned),
        format!("Admins: {}", stats.admins),
        format!("Credits in circulation: {}", stats.total_credits),
        format!("Lookups: {lookups} ({successful} successful)"),
        format!("Active codes: {active_codes}"),
        format!("Broadcasts sent: {}", db.broadcast_count()?),
    ]))
}

pub fn lookup_stats<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let (total, successful) = ctx.state.db.lookup_totals()?;
    let mut lines = vec![
        "<b>🔍 Lookup statistics</b>".to_string(),
        format!("Total: {total}"),
        format!("Successful: {successful}"),
        format!("Failed: {}", total - successful),
        String::new(),
    ];
    for (command, count) in ctx.state.db.lookups_by_command()? {
        lines.push(format!("/{} · {count}", html::escape(&command)));
    }
    Ok(Reply::lines(lines))
}

pub fn daily_stats<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let days = args.number_or(0, 7).min(90);
    let rows = ctx.state.db.daily_lookups(ctx.now - Duration::days(days as i64))?;
    if rows.is_empty() {
        return Ok(Reply::text(format!("📅 No lookups in the last {days} day(s).")));
    }

    let mut lines = vec![format!("<b>📅 Lookups, last {days} day(s)</b>")];
    let mut current_day = "";
    for row in &rows {
        if row.date != current_day {
            lines.push(String::new());
            lines.push(format!("<b>{}</b>", row.date));
            current_day = &row.date;
        }
        lines.push(format!("/{} · {}", html::escape(&row.command), row.count));
    }
    Ok(Reply::lines(lines))
}

pub fn backup<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let csv = ctx.state.db.users_csv()?;
    let users = csv.lines().count().saturating_sub(1);
    let file_name = format!("users_{}.csv", ctx.now.format("%Y%m%d_%H%M%S"));
    info!("📦 Users backup requested by {}", ctx.caller.id());
    Ok(Reply::document(file_name, csv.into_bytes(), format!("📦 Users backup ({users} users)")))
}

// ==================== MESSAGING ====================

pub fn broadcast<M: Messenger>(ctx: &Context<'_, M>, message: &str) -> HandlerResult {
    if message.is_empty() {
        return Err(ArgError { usage: Command::Broadcast.usage() }.into());
    }
    let recipients = ctx.state.db.broadcast_recipients()?;
    let count = recipients.len();
    broadcast::spawn(
        ctx.state.clone(),
        ctx.messenger.clone(),
        ctx.caller.clone(),
        recipients,
        message.to_string(),
    );
    Ok(Reply::text(format!("📣 Broadcasting to {count} user(s). I'll report back when done.")))
}

pub async fn dm<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>, rest: &str) -> HandlerResult {
    let user_id = args.user_id(0)?;
    let message = rest_after(rest, 1);
    if message.is_empty() {
        return Err(ArgError { usage: Command::Dm.usage() }.into());
    }

    let text = format!("📩 <b>Message from the admins</b>\n\n{message}");
    match ctx.messenger.send_text(ChatId(user_id), &text).await {
        Ok(()) => Ok(Reply::text(format!("✅ Message sent to <code>{user_id}</code>."))),
        Err(e) => Ok(Reply::text(format!("❌ Could not deliver: {}", html::escape(&e)))),
    }
}

// ==================== CREDITS ====================

pub async fn gift<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let user_id = args.user_id(0)?;
    let amount = args.amount(1)?;
    let balance = ctx.state.db.add_credits(user_id, amount)?;
    info!("🎁 {} gifted {} credits to {}", ctx.caller.id(), amount, user_id);

    let notice = format!("🎁 You received <b>{amount}</b> credits!\n💳 Balance: <b>{balance}</b>");
    // The recipient may have blocked the bot; the gift stands either way
    let _ = ctx.messenger.send_text(ChatId(user_id), &notice).await;

    Ok(Reply::text(format!(
        "✅ Gifted {amount} credits to <code>{user_id}</code>. New balance: {balance}"
    )))
}

pub fn bulk_gift<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let amount = args.amount(0)?;
    if args.len() < 2 {
        return Err(ArgError { usage: Command::BulkGift.usage() }.into());
    }

    let mut credited = 0;
    let mut missing = Vec::new();
    for index in 1..args.len() {
        let user_id = args.user_id(index)?;
        match ctx.state.db.add_credits(user_id, amount) {
            Ok(_) => credited += 1,
            Err(StoreError::UserNotFound(id)) => missing.push(id.to_string()),
            Err(e) => return Err(e.into()),
        }
    }
    info!("🎁 {} bulk-gifted {} credits to {} users", ctx.caller.id(), amount, credited);

    let mut text = format!("✅ Gifted {amount} credits to {credited} user(s).");
    if !missing.is_empty() {
        text.push_str(&format!("\nNot found: {}", missing.join(", ")));
    }
    Ok(Reply::text(text))
}

pub fn remove_credits<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let user_id = args.user_id(0)?;
    let amount = args.amount(1)?;
    let balance = ctx.state.db.remove_credits(user_id, amount)?;
    Ok(Reply::text(format!(
        "✅ Removed up to {amount} credits from <code>{user_id}</code>. New balance: {balance}"
    )))
}

pub fn reset_credits<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let user_id = args.user_id(0)?;
    ctx.state.db.set_credits(user_id, 0)?;
    Ok(Reply::text(format!("✅ Credits of <code>{user_id}</code> reset to 0.")))
}

// ==================== USERS ====================

pub fn ban<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let user_id = args.user_id(0)?;
    if ctx.state.config.is_owner(UserId(user_id as u64)) {
        return Ok(Reply::text("❌ The owner cannot be banned."));
    }
    ctx.state.db.set_banned(user_id, true, ctx.now)?;
    Ok(Reply::text(format!("🚫 User <code>{user_id}</code> banned.")))
}

pub fn unban<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let user_id = args.user_id(0)?;
    ctx.state.db.require_user(user_id)?;
    ctx.state.db.set_banned(user_id, false, ctx.now)?;
    Ok(Reply::text(format!("✅ User <code>{user_id}</code> unbanned.")))
}

pub fn delete_user<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let user_id = args.user_id(0)?;
    if ctx.state.config.is_owner(UserId(user_id as u64)) {
        return Ok(Reply::text("❌ The owner cannot be deleted."));
    }
    if !ctx.state.db.delete_user(user_id)? {
        return Err(StoreError::UserNotFound(user_id).into());
    }
    Ok(Reply::text(format!("🗑 User <code>{user_id}</code> deleted.")))
}

pub fn search_user<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>, query: &str) -> HandlerResult {
    args.text(0)?;
    let users = ctx.state.db.search_users(query, MAX_LIST_LIMIT)?;
    Ok(user_list(
        format!("<b>🔎 Users matching “{}”</b>", html::escape(query)),
        &users,
        user_line,
    ))
}

pub fn users<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let total = ctx.state.db.count_users()?;
    let pages = (total as usize).div_ceil(USERS_PER_PAGE).max(1);
    let page = args.number_or(0, 1).min(pages);
    let users = ctx.state.db.users_page(page, USERS_PER_PAGE)?;
    Ok(user_list(
        format!("<b>👥 Users</b> (page {page}/{pages}, {total} total)"),
        &users,
        user_line,
    ))
}

pub fn recent_users<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let days = args.number_or(0, 7).min(MAX_DAYS);
    let users = ctx.state.db.recent_users(ctx.now - Duration::days(days as i64))?;
    Ok(user_list(
        format!("<b>🆕 Joined in the last {days} day(s)</b> ({})", users.len()),
        &users,
        |u| format!("{} · joined {}", user_line(u), date_part(&u.joined_at)),
    ))
}

pub fn inactive_users<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let days = args.number_or(0, 30).min(MAX_DAYS);
    let users = ctx.state.db.inactive_users(ctx.now - Duration::days(days as i64))?;
    Ok(user_list(
        format!("<b>💤 Inactive for {days}+ day(s)</b> ({})", users.len()),
        &users,
        |u| format!("{} · last seen {}", user_line(u), date_part(&u.last_seen)),
    ))
}

pub fn user_lookups<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let user_id = args.user_id(0)?;
    let user = ctx.state.db.require_user(user_id)?;
    let records = ctx.state.db.user_lookups(user_id, 20)?;

    let mut lines = vec![format!(
        "<b>🔍 Lookups of {}</b> ({} successful in total)",
        user_name(&user),
        user.total_lookups
    )];
    if records.is_empty() {
        lines.push("None yet.".to_string());
    }
    for record in &records {
        let mark = if record.success { "✅" } else { "❌" };
        lines.push(format!(
            "{mark} {} /{} <code>{}</code>",
            record.created_at,
            html::escape(&record.command),
            html::escape(&record.input)
        ));
    }
    Ok(Reply::lines(lines))
}

pub fn leaderboard<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let limit = args.number_or(0, 10).min(MAX_LIST_LIMIT);
    let users = ctx.state.db.leaderboard(limit)?;
    Ok(user_list(format!("<b>🏆 Top {limit} by credits</b>"), &users, user_line))
}

pub fn premium_users<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let users = ctx.state.db.users_with_credits_at_least(PREMIUM_THRESHOLD)?;
    Ok(user_list(
        format!("<b>💎 Users with {PREMIUM_THRESHOLD}+ credits</b> ({})", users.len()),
        &users,
        user_line,
    ))
}

pub fn low_credit_users<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let users = ctx.state.db.users_with_credits_below(LOW_CREDIT_THRESHOLD)?;
    Ok(user_list(
        format!("<b>🪫 Users below {LOW_CREDIT_THRESHOLD} credits</b> ({})", users.len()),
        &users,
        user_line,
    ))
}

pub fn top_referrers<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let limit = args.number_or(0, 10).min(MAX_LIST_LIMIT);
    let users = ctx.state.db.top_referrers(limit)?;
    Ok(user_list(format!("<b>🤝 Top {limit} referrers</b>"), &users, |u| {
        format!("<code>{}</code> {} · {} referrals", u.user_id, user_name(u), u.referrals)
    }))
}

// ==================== CODES ====================

fn create_code<M: Messenger>(ctx: &Context<'_, M>, code: String, amount: i64, max_uses: i64, ttl: Option<Duration>) -> HandlerResult {
    let new = NewCode {
        code,
        amount,
        max_uses,
        expires_at: ttl.map(|ttl| ctx.now + ttl),
        created_by: ctx.caller.id(),
    };
    ctx.state.db.create_code(&new, ctx.now)?;

    let code = crate::store::normalize_code(&new.code);
    let expiry = match new.expires_at {
        Some(at) => crate::store::timestamp(at),
        None => "never".to_string(),
    };
    Ok(Reply::lines([
        "✅ <b>Code created</b>".to_string(),
        format!("Code: <code>{}</code>", html::escape(&code)),
        format!("Credits: {amount}"),
        format!("Max uses: {max_uses}"),
        format!("Expires: {expiry}"),
        String::new(),
        format!("Redeem with <code>/redeem {}</code>", html::escape(&code)),
    ]))
}

pub fn gen_code<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let amount = args.amount(0)?;
    let max_uses = args.amount(1)?;
    let ttl = args.ttl(2)?;

    // Random codes collide rarely; try a few before giving up
    let mut attempts = 0;
    loop {
        attempts += 1;
        match create_code(ctx, generate_code(), amount, max_uses, ttl) {
            Err(super::HandlerError::Store(StoreError::DuplicateCode(_))) if attempts < 5 => continue,
            result => return result,
        }
    }
}

pub fn custom_code<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let code = args.text(0)?;
    if !CUSTOM_CODE_PATTERN.is_match(code) {
        return Err(ArgError { usage: Command::CustomCode.usage() }.into());
    }
    let amount = args.amount(1)?;
    let max_uses = args.amount(2)?;
    let ttl = args.ttl(3)?;
    create_code(ctx, code.to_string(), amount, max_uses, ttl)
}

pub fn list_codes<M: Messenger>(ctx: &Context<'_, M>, filter: CodeFilter) -> HandlerResult {
    let codes = ctx.state.db.list_codes(filter)?;
    let title = match filter {
        CodeFilter::All => "🎫 All codes",
        CodeFilter::Active => "🎫 Active codes",
        CodeFilter::Inactive => "🎫 Inactive codes",
    };
    if codes.is_empty() {
        return Ok(Reply::text(format!("<b>{title}</b>\n\nNone.")));
    }
    Ok(Reply::lines(
        std::iter::once(format!("<b>{title}</b> ({})", codes.len())).chain(codes.iter().map(code_line)),
    ))
}

pub fn deactivate_code<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let code = args.text(0)?;
    ctx.state.db.deactivate_code(code)?;
    Ok(Reply::text(format!(
        "⛔ Code <code>{}</code> deactivated.",
        html::escape(&crate::store::normalize_code(code))
    )))
}

pub fn code_stats<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let name = args.text(0)?;
    let code = ctx
        .state
        .db
        .get_code(name)?
        .ok_or_else(|| StoreError::CodeNotFound(crate::store::normalize_code(name)))?;
    let redeemers = ctx.state.db.code_redeemers(&code.code)?;

    let status = if !code.active {
        "inactive"
    } else if code.is_expired(ctx.now) {
        "expired"
    } else if code.uses >= code.max_uses {
        "used up"
    } else {
        "active"
    };
    Ok(Reply::lines([
        format!("<b>🎫 Code <code>{}</code></b>", html::escape(&code.code)),
        format!("Status: {status}"),
        format!("Credits: {}", code.amount),
        format!("Uses: {}/{}", code.uses, code.max_uses),
        format!("Redeemed by: {redeemers} user(s)"),
        format!("Expires: {}", code.expires_at.as_deref().unwrap_or("never")),
        format!("Created: {} by <code>{}</code>", code.created_at, code.created_by),
    ]))
}

pub fn check_expired<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let expired = ctx.state.db.expired_codes(ctx.now)?;
    if expired.is_empty() {
        return Ok(Reply::text("✅ No expired codes are still active."));
    }
    Ok(Reply::lines(
        std::iter::once(format!(
            "⌛ {} expired code(s) still active. Run /cleanexpired to deactivate them.",
            expired.len()
        ))
        .chain(expired.iter().map(|code| format!("<code>{}</code>", html::escape(code)))),
    ))
}

pub fn clean_expired<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let count = ctx.state.db.deactivate_expired(ctx.now)?;
    info!("🧹 {} expired codes deactivated by {}", count, ctx.caller.id());
    Ok(Reply::text(format!("🧹 Deactivated {count} expired code(s).")))
}
