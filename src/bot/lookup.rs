//! The charged lookup flow shared by lookup commands and their buttons.

use serde_json::Value;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::utils::html;
use tracing::{info, warn};

use super::callbacks::{CallbackAction, encode_callback};
use super::reply::Reply;
use super::telegram::Messenger;
use super::{Context, HandlerResult};
use crate::config::LookupEndpoint;
use crate::lookup::{LookupError, MAX_RENDERED_CHARS, render_json};

const MAX_INPUT_CHARS: usize = 200;
/// The audit copy carries a header, so it gets less room for the body.
const MAX_AUDIT_CHARS: usize = 3000;

/// How a successful result is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// Header, branding footer and Refresh / Copy buttons.
    Full,
    /// Only the JSON block, easy to copy.
    Plain,
}

pub async fn run_command<M: Messenger>(ctx: &Context<'_, M>, name: &str, input: &str) -> HandlerResult {
    match ctx.state.config.lookup(name) {
        Some(endpoint) => run(ctx, endpoint, input.trim(), Presentation::Full).await,
        None => Ok(Reply::text("❌ Unknown lookup.")),
    }
}

/// Charge one credit, query the endpoint and render the outcome.
pub async fn run<M: Messenger>(
    ctx: &Context<'_, M>,
    endpoint: &LookupEndpoint,
    input: &str,
    presentation: Presentation,
) -> HandlerResult {
    if input.is_empty() {
        return Ok(Reply::text(format!("❌ Use: /{} &lt;value&gt;", endpoint.name)));
    }
    if input.chars().count() > MAX_INPUT_CHARS {
        return Ok(Reply::text("❌ That input is too long."));
    }

    if !ctx.state.db.deduct_credit(ctx.caller.id())? {
        return Ok(Reply::text(
            "❌ Not enough credits. Get more with /redeem, /refer or /buy.",
        ));
    }

    info!("🔍 /{} by {} ({})", endpoint.name, ctx.caller.first_name, ctx.caller.id());
    let result = ctx.state.lookups.fetch(&endpoint.url, input).await;
    finish(ctx, endpoint, input, result, presentation).await
}

/// Record the outcome of a charged lookup and build the reply.
/// A failed lookup is logged and, when configured, refunded.
pub async fn finish<M: Messenger>(
    ctx: &Context<'_, M>,
    endpoint: &LookupEndpoint,
    input: &str,
    result: Result<Value, LookupError>,
    presentation: Presentation,
) -> HandlerResult {
    let db = &ctx.state.db;
    let user_id = ctx.caller.id();

    let value = match result {
        Ok(value) => value,
        Err(e) => {
            warn!("Lookup /{} for {} failed: {e}", endpoint.name, user_id);
            let mut text = format!("❌ No data found for <code>{}</code>.", html::escape(input));
            if ctx.state.config.refund_failed_lookups {
                db.refund_credit(user_id)?;
                text.push_str(" Your credit was refunded.");
            }
            record(ctx, endpoint, input, false);
            return Ok(Reply::text(text));
        }
    };

    let value = if endpoint.scrub { ctx.state.scrubber.scrub(value) } else { value };
    record(ctx, endpoint, input, true);
    audit(ctx, endpoint, input, &value).await;

    let body = format!("<pre>{}</pre>", html::escape(&render_json(&value, MAX_RENDERED_CHARS)));
    if presentation == Presentation::Plain {
        return Ok(Reply::text(body));
    }

    let credits = db.require_user(user_id)?.credits;
    let mut text = format!(
        "🔍 <b>/{}</b> <code>{}</code>\n\n{body}\n💳 Credits left: {credits}",
        endpoint.name,
        html::escape(input)
    );
    if let Some(branding) = &ctx.state.config.branding {
        text.push_str("\n\n");
        text.push_str(branding);
    }

    let reply = Reply::text(text);
    Ok(match result_keyboard(&endpoint.name, input) {
        Some(keyboard) => reply.with_keyboard(keyboard),
        None => reply,
    })
}

/// Append to the lookup log. Write failures are only logged.
fn record<M: Messenger>(ctx: &Context<'_, M>, endpoint: &LookupEndpoint, input: &str, success: bool) {
    let user_id = ctx.caller.id();
    if let Err(e) = ctx.state.db.log_lookup(user_id, &endpoint.name, input, success, ctx.now) {
        warn!("Failed to log /{} lookup for {}: {e}", endpoint.name, user_id);
    }
}

/// Refresh / Copy buttons, omitted when the input does not fit in callback data.
fn result_keyboard(command: &str, input: &str) -> Option<InlineKeyboardMarkup> {
    let refresh = encode_callback(&CallbackAction::Refresh {
        command: command.to_string(),
        input: input.to_string(),
    })?;
    let copy = encode_callback(&CallbackAction::Copy {
        command: command.to_string(),
        input: input.to_string(),
    })?;
    Some(InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback("🔄 Refresh", refresh),
        InlineKeyboardButton::callback("📋 Copy JSON", copy),
    ]]))
}

/// Post a copy of a successful lookup to the command's log channel.
async fn audit<M: Messenger>(ctx: &Context<'_, M>, endpoint: &LookupEndpoint, input: &str, value: &Value) {
    let Some(channel) = endpoint.log_channel else {
        return;
    };
    let text = format!(
        "🔍 <b>/{}</b> by {} (<code>{}</code>)\nInput: <code>{}</code>\n\n<pre>{}</pre>",
        endpoint.name,
        ctx.caller.display_name(),
        ctx.caller.id(),
        html::escape(input),
        html::escape(&render_json(value, MAX_AUDIT_CHARS))
    );
    if let Err(e) = ctx.messenger.send_text(channel, &text).await {
        warn!("Failed to post audit entry for /{}: {e}", endpoint.name);
    }
}
