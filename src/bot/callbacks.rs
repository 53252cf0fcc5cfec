//! Inline button presses.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::lookup::{self, Presentation};
use super::reply::Reply;
use super::telegram::Messenger;
use super::{BotState, Caller, Context, HandlerResult, error_reply, gate, onboard};
use crate::auth::Role;

/// Callback data of the "Check again" button under a join prompt.
pub const CHECK_AGAIN: &str = "check";

/// Telegram's limit for callback data.
const MAX_CALLBACK_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Repeat a lookup.
    Refresh { command: String, input: String },
    /// Repeat a lookup, replying with the bare JSON.
    Copy { command: String, input: String },
    /// Re-run the join check.
    CheckAgain,
}

/// Callback data for `action`, or `None` if it would not fit.
pub fn encode_callback(action: &CallbackAction) -> Option<String> {
    let data = match action {
        CallbackAction::Refresh { command, input } => format!("r:{command}:{input}"),
        CallbackAction::Copy { command, input } => format!("c:{command}:{input}"),
        CallbackAction::CheckAgain => CHECK_AGAIN.to_string(),
    };
    (data.len() <= MAX_CALLBACK_BYTES).then_some(data)
}

pub fn decode_callback(data: &str) -> Option<CallbackAction> {
    if data == CHECK_AGAIN {
        return Some(CallbackAction::CheckAgain);
    }
    let (kind, rest) = data.split_once(':')?;
    let (command, input) = rest.split_once(':')?;
    if command.is_empty() || input.is_empty() {
        return None;
    }
    let (command, input) = (command.to_string(), input.to_string());
    match kind {
        "r" => Some(CallbackAction::Refresh { command, input }),
        "c" => Some(CallbackAction::Copy { command, input }),
        _ => None,
    }
}

/// Handle a button press. Returns `None` for data the bot did not produce.
pub async fn handle_callback<M: Messenger>(
    state: &Arc<BotState>,
    messenger: &M,
    caller: &Caller,
    data: &str,
    now: DateTime<Utc>,
) -> Option<Reply> {
    let action = decode_callback(data)?;

    let (user, _) = match onboard(state, caller, now) {
        Ok(onboarded) => onboarded,
        Err(e) => return Some(error_reply(e.into())),
    };
    let role = Role::resolve(&state.config, caller.user_id, user.is_admin);

    let ctx = Context {
        state,
        messenger,
        caller,
        user,
        role,
        now,
    };
    Some(run(&ctx, action).await.unwrap_or_else(error_reply))
}

async fn run<M: Messenger>(ctx: &Context<'_, M>, action: CallbackAction) -> HandlerResult {
    match action {
        CallbackAction::CheckAgain => Ok(gate::check(ctx, false)
            .await?
            .into_reply(&ctx.state.config)
            .unwrap_or_else(|| Reply::text("✅ Thanks for joining! You can use the bot now."))),
        CallbackAction::Refresh { command, input } => repeat(ctx, &command, &input, Presentation::Full).await,
        CallbackAction::Copy { command, input } => repeat(ctx, &command, &input, Presentation::Plain).await,
    }
}

async fn repeat<M: Messenger>(
    ctx: &Context<'_, M>,
    command: &str,
    input: &str,
    presentation: Presentation,
) -> HandlerResult {
    if let Some(reply) = gate::check(ctx, true).await?.into_reply(&ctx.state.config) {
        return Ok(reply);
    }
    match ctx.state.config.lookup(command) {
        Some(endpoint) => lookup::run(ctx, endpoint, input, presentation).await,
        None => Ok(Reply::text("❌ This lookup is no longer available.")),
    }
}
