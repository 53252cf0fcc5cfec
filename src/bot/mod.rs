//! Telegram update handling.
//!
//! Every update goes through the same steps: parse the command, record the
//! user (granting the join bonus to new users), resolve their role, drop
//! commands the role does not allow, apply the user-facing gates and finally
//! run the handler. Handlers return a [`Reply`]; sending it is up to the caller.

pub mod admin;
pub mod broadcast;
pub mod callbacks;
pub mod command;
pub mod gate;
pub mod lookup;
pub mod owner;
pub mod reply;
pub mod telegram;
pub mod user;

#[cfg(test)]
pub(crate) mod tests;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use teloxide::types::{BotCommand, ChatId, UserId};
use teloxide::utils::html;
use tracing::{debug, info, warn};

use crate::auth::{Capability, Role};
use crate::config::Config;
use crate::lookup::{LookupClient, LookupError};
use crate::scrub::Scrubber;
use crate::store::{Database, Setting, StoreError, User};
use command::{ArgError, Args, Command, ParsedCommand, parse_command};
use reply::Reply;
use telegram::Messenger;

/// Shared state handed to every update handler.
pub struct BotState {
    pub config: Config,
    pub db: Database,
    pub lookups: LookupClient,
    pub scrubber: Scrubber,
    /// Without the leading `@`.
    pub bot_username: String,
}

impl BotState {
    pub fn new(config: Config, db: Database, bot_username: String) -> Result<Self, LookupError> {
        let lookups = LookupClient::new(
            Duration::from_secs(config.http_timeout_secs),
            config.fetch_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )?;
        let scrubber = Scrubber::new(config.blocklist.iter().cloned(), config.drop_emptied);

        Ok(Self {
            config,
            db,
            lookups,
            scrubber,
            bot_username,
        })
    }

    /// Store the configured toggles unless the owner already changed them.
    pub fn seed_settings(&self) -> Result<(), StoreError> {
        self.db.seed_setting(Setting::PremiumForAll, self.config.premium_for_all)?;
        self.db.seed_setting(Setting::FreeCreditsOnJoin, self.config.free_credits_on_join)?;
        Ok(())
    }

    /// Commands shown in the Telegram client's command menu.
    pub fn menu_commands(&self) -> Vec<BotCommand> {
        let mut commands = vec![
            BotCommand::new("start", "Start the bot"),
            BotCommand::new("help", "List commands"),
            BotCommand::new("myprofile", "Your credits and stats"),
            BotCommand::new("refer", "Your referral link"),
            BotCommand::new("redeem", "Redeem a code"),
            BotCommand::new("buy", "Buy credits"),
        ];
        for endpoint in self.config.lookups.values() {
            let description = if endpoint.description.is_empty() {
                format!("{} lookup", endpoint.name)
            } else {
                endpoint.description.clone()
            };
            commands.push(BotCommand::new(endpoint.name.clone(), description));
        }
        commands
    }
}

/// The user behind an update and where it came from.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub chat_id: ChatId,
    pub private: bool,
}

impl Caller {
    pub fn id(&self) -> i64 {
        self.user_id.0 as i64
    }

    /// HTML-escaped name for replies.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("@{}", html::escape(username)),
            None => html::escape(&self.first_name),
        }
    }
}

/// Everything a handler needs for one update.
pub struct Context<'a, M: Messenger> {
    pub state: &'a Arc<BotState>,
    pub messenger: &'a M,
    pub caller: &'a Caller,
    /// The caller's row, read after onboarding.
    pub user: User,
    pub role: Role,
    pub now: DateTime<Utc>,
}

#[derive(Debug)]
pub enum HandlerError {
    Usage(ArgError),
    Store(StoreError),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<ArgError> for HandlerError {
    fn from(e: ArgError) -> Self {
        Self::Usage(e)
    }
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

pub type HandlerResult = Result<Reply, HandlerError>;

pub(crate) fn error_reply(error: HandlerError) -> Reply {
    match error {
        HandlerError::Usage(e) => Reply::text(html::escape(&e.to_string())),
        HandlerError::Store(StoreError::UserNotFound(id)) => {
            Reply::text(format!("❌ User <code>{id}</code> not found."))
        }
        HandlerError::Store(StoreError::CodeNotFound(code)) => {
            Reply::text(format!("❌ Code <code>{}</code> not found.", html::escape(&code)))
        }
        HandlerError::Store(StoreError::DuplicateCode(code)) => {
            Reply::text(format!("❌ Code <code>{}</code> already exists.", html::escape(&code)))
        }
        HandlerError::Store(e) => {
            warn!("Store error: {e}");
            Reply::text("⚠️ Something went wrong. Please try again later.")
        }
    }
}

/// Record the caller, granting the join bonus if they are new.
/// Returns their row and whether it was just created.
pub(crate) fn onboard(state: &BotState, caller: &Caller, now: DateTime<Utc>) -> Result<(User, bool), StoreError> {
    let id = caller.id();
    let bonus = if state.db.setting(Setting::FreeCreditsOnJoin)? {
        state.config.default_credits
    } else {
        0
    };
    let created = state
        .db
        .touch_user_with_bonus(id, caller.username.as_deref(), &caller.first_name, bonus, now)?;

    if created {
        info!("👋 New user {} ({})", caller.first_name, id);
    }

    Ok((state.db.require_user(id)?, created))
}

/// Handle one text message. Returns `None` when the bot stays silent.
pub async fn handle_message<M: Messenger>(
    state: &Arc<BotState>,
    messenger: &M,
    caller: &Caller,
    text: &str,
    now: DateTime<Utc>,
) -> Option<Reply> {
    let parsed = parse_command(text, &state.bot_username)?;
    let command = Command::from_name(&parsed.name, &state.config)?;

    let (user, created) = match onboard(state, caller, now) {
        Ok(onboarded) => onboarded,
        Err(e) => return Some(error_reply(e.into())),
    };

    let role = Role::resolve(&state.config, caller.user_id, user.is_admin);
    if !role.allows(command.capability()) {
        debug!("Ignoring /{} from {} ({:?})", parsed.name, caller.id(), role);
        return None;
    }

    let ctx = Context {
        state,
        messenger,
        caller,
        user,
        role,
        now,
    };
    Some(run(&ctx, command, &parsed, created).await.unwrap_or_else(error_reply))
}

async fn run<M: Messenger>(
    ctx: &Context<'_, M>,
    command: Command,
    parsed: &ParsedCommand,
    created: bool,
) -> HandlerResult {
    if command == Command::Start && created {
        user::apply_referral(ctx, &parsed.args).await;
    }

    if command.capability() == Capability::Use && command != Command::Help {
        let private_rule = command != Command::Start;
        if let Some(reply) = gate::check(ctx, private_rule).await?.into_reply(&ctx.state.config) {
            return Ok(reply);
        }
    }

    let args = Args::new(&parsed.args, command.usage());
    match command {
        Command::Start => Ok(user::start(ctx)),
        Command::Help => Ok(user::help(ctx)),
        Command::MyProfile => Ok(user::my_profile(ctx)),
        Command::Refer => Ok(user::refer(ctx)),
        Command::Redeem => user::redeem(ctx, &args),
        Command::Buy => Ok(user::buy(ctx)),
        Command::Lookup(name) => lookup::run_command(ctx, &name, &parsed.rest).await,

        Command::Stats => admin::stats(ctx),
        Command::Broadcast => admin::broadcast(ctx, &parsed.rest),
        Command::Dm => admin::dm(ctx, &args, &parsed.rest).await,
        Command::Gift => admin::gift(ctx, &args).await,
        Command::BulkGift => admin::bulk_gift(ctx, &args),
        Command::RemoveCredits => admin::remove_credits(ctx, &args),
        Command::ResetCredits => admin::reset_credits(ctx, &args),
        Command::Ban => admin::ban(ctx, &args),
        Command::Unban => admin::unban(ctx, &args),
        Command::DeleteUser => admin::delete_user(ctx, &args),
        Command::SearchUser => admin::search_user(ctx, &args, &parsed.rest),
        Command::Users => admin::users(ctx, &args),
        Command::RecentUsers => admin::recent_users(ctx, &args),
        Command::UserLookups => admin::user_lookups(ctx, &args),
        Command::Leaderboard => admin::leaderboard(ctx, &args),
        Command::PremiumUsers => admin::premium_users(ctx),
        Command::LowCreditUsers => admin::low_credit_users(ctx),
        Command::InactiveUsers => admin::inactive_users(ctx, &args),
        Command::GenCode => admin::gen_code(ctx, &args),
        Command::CustomCode => admin::custom_code(ctx, &args),
        Command::ListCodes => admin::list_codes(ctx, crate::store::CodeFilter::All),
        Command::ActiveCodes => admin::list_codes(ctx, crate::store::CodeFilter::Active),
        Command::InactiveCodes => admin::list_codes(ctx, crate::store::CodeFilter::Inactive),
        Command::DeactivateCode => admin::deactivate_code(ctx, &args),
        Command::CodeStats => admin::code_stats(ctx, &args),
        Command::CheckExpired => admin::check_expired(ctx),
        Command::CleanExpired => admin::clean_expired(ctx),
        Command::DailyStats => admin::daily_stats(ctx, &args),
        Command::LookupStats => admin::lookup_stats(ctx),
        Command::Backup => admin::backup(ctx),
        Command::TopRef => admin::top_referrers(ctx, &args),

        Command::AddAdmin => owner::add_admin(ctx, &args),
        Command::RemoveAdmin => owner::remove_admin(ctx, &args),
        Command::ListAdmins => owner::list_admins(ctx),
        Command::Settings => owner::settings(ctx),
        Command::FullDbBackup => owner::full_backup(ctx),
        Command::PremiumForAllUsers => owner::premium_for_all(ctx),
        Command::FreemiumForAllUsers => owner::freemium_for_all(ctx),
        Command::FreeCredits => owner::free_credits(ctx, &args),
    }
}
