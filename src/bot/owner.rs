//! Owner-only commands: the admin roster, global toggles and full backups.

use teloxide::types::UserId;
use tracing::{info, warn};

use super::command::{ArgError, Args, Command};
use super::reply::Reply;
use super::telegram::Messenger;
use super::{Context, HandlerResult};
use crate::store::Setting;

fn on_off(value: bool) -> &'static str {
    if value { "✅ on" } else { "❌ off" }
}

pub fn add_admin<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let user_id = args.user_id(0)?;
    if ctx.state.config.is_owner(UserId(user_id as u64)) {
        return Ok(Reply::text("ℹ️ That is the owner."));
    }
    ctx.state.db.set_admin(user_id, true, ctx.now)?;
    Ok(Reply::text(format!("🛡 <code>{user_id}</code> is now an admin.")))
}

pub fn remove_admin<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let user_id = args.user_id(0)?;
    let config = &ctx.state.config;
    if config.is_owner(UserId(user_id as u64)) {
        return Ok(Reply::text("❌ The owner cannot be removed."));
    }
    ctx.state.db.set_admin(user_id, false, ctx.now)?;

    if config.admin_ids.contains(&UserId(user_id as u64)) {
        warn!("Admin {} is listed in the config file and keeps admin rights", user_id);
        return Ok(Reply::text(format!(
            "⚠️ <code>{user_id}</code> is listed as admin in the config file. Remove them there and restart."
        )));
    }
    Ok(Reply::text(format!("✅ <code>{user_id}</code> is no longer an admin.")))
}

pub fn list_admins<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let config = &ctx.state.config;
    let mut lines = vec![
        "<b>🛡 Admins</b>".to_string(),
        format!("👑 <code>{}</code> (owner)", config.owner_id.0),
    ];

    let mut configured: Vec<u64> = config.admin_ids.iter().map(|id| id.0).collect();
    configured.sort_unstable();
    for id in &configured {
        lines.push(format!("<code>{id}</code> (config)"));
    }
    for user in ctx.state.db.stored_admins()? {
        if !configured.contains(&(user.user_id as u64)) {
            lines.push(format!("<code>{}</code> {}", user.user_id, teloxide::utils::html::escape(&user.first_name)));
        }
    }
    Ok(Reply::lines(lines))
}

pub fn settings<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let config = &ctx.state.config;
    let db = &ctx.state.db;

    let mut lines = vec![
        "<b>⚙️ Settings</b>".to_string(),
        format!("Premium for all (private chats): {}", on_off(db.setting(Setting::PremiumForAll)?)),
        format!("Free credits on join: {}", on_off(db.setting(Setting::FreeCreditsOnJoin)?)),
        format!("Join bonus: {} credits", config.default_credits),
        format!("Referral bonus: {} credits", config.referral_credit),
        format!("Refund failed lookups: {}", on_off(config.refund_failed_lookups)),
        format!("Force-join channels: {}", config.force_channels.len()),
        format!("Blocklist entries: {}", config.blocklist.len()),
        String::new(),
        "<b>Lookups</b>".to_string(),
    ];
    for endpoint in config.lookups.values() {
        let audit = if endpoint.log_channel.is_some() { " · audited" } else { "" };
        let scrub = if endpoint.scrub { " · scrubbed" } else { "" };
        lines.push(format!("/{}{audit}{scrub}", endpoint.name));
    }
    Ok(Reply::lines(lines))
}

pub fn full_backup<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let scratch = ctx.state.config.data_dir.join("backups");
    let bytes = ctx.state.db.full_backup(&scratch)?;
    let file_name = format!("lookupbot_backup_{}.zip", ctx.now.format("%Y%m%d_%H%M%S"));
    info!("💾 Full backup sent to owner ({} bytes)", bytes.len());
    Ok(Reply::document(file_name, bytes, "💾 Full database backup"))
}

pub fn premium_for_all<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    let db = &ctx.state.db;
    db.set_setting(Setting::PremiumForAll, true)?;
    let amount = ctx.state.config.default_credits;
    let credited = if amount > 0 { db.grant_all(amount)? } else { 0 };
    Ok(Reply::text(format!(
        "💎 Premium for all is on: lookups work in private chats.\n🎁 {credited} user(s) received {amount} credits."
    )))
}

pub fn freemium_for_all<M: Messenger>(ctx: &Context<'_, M>) -> HandlerResult {
    ctx.state.db.set_setting(Setting::PremiumForAll, false)?;
    Ok(Reply::text("🔒 Premium for all is off: lookups work in groups only."))
}

pub fn free_credits<M: Messenger>(ctx: &Context<'_, M>, args: &Args<'_>) -> HandlerResult {
    let enabled = match args.text(0)?.to_lowercase().as_str() {
        "on" => true,
        "off" => false,
        _ => return Err(ArgError { usage: Command::FreeCredits.usage() }.into()),
    };
    ctx.state.db.set_setting(Setting::FreeCreditsOnJoin, enabled)?;
    Ok(Reply::text(format!("🎁 Free credits on join: {}", on_off(enabled))))
}
