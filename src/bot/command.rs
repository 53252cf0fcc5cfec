//! Command names, parsing and argument helpers.

use std::fmt;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;

use crate::auth::Capability;
use crate::config::Config;

/// Every built-in command name. Lookup commands must not reuse these.
pub const BUILTIN_COMMANDS: &[&str] = &[
    "start", "help", "myprofile", "refer", "redeem", "buy",
    "stats", "broadcast", "dm", "gift", "bulkgift", "removecredits", "resetcredits",
    "ban", "unban", "deleteuser", "searchuser", "users", "recentusers", "userlookups",
    "leaderboard", "premiumusers", "lowcreditusers", "inactiveusers",
    "gencode", "customcode", "listcodes", "activecodes", "inactivecodes", "deactivatecode",
    "codestats", "checkexpired", "cleanexpired", "dailystats", "lookupstats", "backup", "topref",
    "addadmin", "removeadmin", "listadmins", "settings", "fulldbbackup",
    "premiumforallusers", "freemiumforallusers", "freecredits",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // User
    Start,
    Help,
    MyProfile,
    Refer,
    Redeem,
    Buy,
    Lookup(String),
    // Admin
    Stats,
    Broadcast,
    Dm,
    Gift,
    BulkGift,
    RemoveCredits,
    ResetCredits,
    Ban,
    Unban,
    DeleteUser,
    SearchUser,
    Users,
    RecentUsers,
    UserLookups,
    Leaderboard,
    PremiumUsers,
    LowCreditUsers,
    InactiveUsers,
    GenCode,
    CustomCode,
    ListCodes,
    ActiveCodes,
    InactiveCodes,
    DeactivateCode,
    CodeStats,
    CheckExpired,
    CleanExpired,
    DailyStats,
    LookupStats,
    Backup,
    TopRef,
    // Owner
    AddAdmin,
    RemoveAdmin,
    ListAdmins,
    Settings,
    FullDbBackup,
    PremiumForAllUsers,
    FreemiumForAllUsers,
    FreeCredits,
}

impl Command {
    /// Resolve a command name. Configured lookups are recognized as well.
    pub fn from_name(name: &str, config: &Config) -> Option<Self> {
        let cmd = match name {
            "start" => Command::Start,
            "help" => Command::Help,
            "myprofile" => Command::MyProfile,
            "refer" => Command::Refer,
            "redeem" => Command::Redeem,
            "buy" => Command::Buy,
            "stats" => Command::Stats,
            "broadcast" => Command::Broadcast,
            "dm" => Command::Dm,
            "gift" => Command::Gift,
            "bulkgift" => Command::BulkGift,
            "removecredits" => Command::RemoveCredits,
            "resetcredits" => Command::ResetCredits,
            "ban" => Command::Ban,
            "unban" => Command::Unban,
            "deleteuser" => Command::DeleteUser,
            "searchuser" => Command::SearchUser,
            "users" => Command::Users,
            "recentusers" => Command::RecentUsers,
            "userlookups" => Command::UserLookups,
            "leaderboard" => Command::Leaderboard,
            "premiumusers" => Command::PremiumUsers,
            "lowcreditusers" => Command::LowCreditUsers,
            "inactiveusers" => Command::InactiveUsers,
            "gencode" => Command::GenCode,
            "customcode" => Command::CustomCode,
            "listcodes" => Command::ListCodes,
            "activecodes" => Command::ActiveCodes,
            "inactivecodes" => Command::InactiveCodes,
            "deactivatecode" => Command::DeactivateCode,
            "codestats" => Command::CodeStats,
            "checkexpired" => Command::CheckExpired,
            "cleanexpired" => Command::CleanExpired,
            "dailystats" => Command::DailyStats,
            "lookupstats" => Command::LookupStats,
            "backup" => Command::Backup,
            "topref" => Command::TopRef,
            "addadmin" => Command::AddAdmin,
            "removeadmin" => Command::RemoveAdmin,
            "listadmins" => Command::ListAdmins,
            "settings" => Command::Settings,
            "fulldbbackup" => Command::FullDbBackup,
            "premiumforallusers" => Command::PremiumForAllUsers,
            "freemiumforallusers" => Command::FreemiumForAllUsers,
            "freecredits" => Command::FreeCredits,
            other if config.lookups.contains_key(other) => Command::Lookup(other.to_string()),
            _ => return None,
        };
        Some(cmd)
    }

    pub fn capability(&self) -> Capability {
        match self {
            Command::Start
            | Command::Help
            | Command::MyProfile
            | Command::Refer
            | Command::Redeem
            | Command::Buy
            | Command::Lookup(_) => Capability::Use,
            Command::AddAdmin
            | Command::RemoveAdmin
            | Command::ListAdmins
            | Command::Settings
            | Command::FullDbBackup
            | Command::PremiumForAllUsers
            | Command::FreemiumForAllUsers
            | Command::FreeCredits => Capability::Administer,
            _ => Capability::Moderate,
        }
    }

    /// Argument synopsis shown when a command is misused.
    pub fn usage(&self) -> &'static str {
        match self {
            Command::Redeem => "/redeem <code>",
            Command::Lookup(_) => "/<command> <value>",
            Command::Broadcast => "/broadcast <message>",
            Command::Dm => "/dm <user_id> <message>",
            Command::Gift => "/gift <user_id> <amount>",
            Command::BulkGift => "/bulkgift <amount> <user_id> [user_id ...]",
            Command::RemoveCredits => "/removecredits <user_id> <amount>",
            Command::ResetCredits => "/resetcredits <user_id>",
            Command::Ban => "/ban <user_id>",
            Command::Unban => "/unban <user_id>",
            Command::DeleteUser => "/deleteuser <user_id>",
            Command::SearchUser => "/searchuser <query>",
            Command::Users => "/users [page]",
            Command::RecentUsers => "/recentusers [days]",
            Command::UserLookups => "/userlookups <user_id>",
            Command::Leaderboard => "/leaderboard [limit]",
            Command::InactiveUsers => "/inactiveusers [days]",
            Command::GenCode => "/gencode <amount> <max_uses> [ttl, e.g. 30m, 12h, 7d]",
            Command::CustomCode => "/customcode <code> <amount> <max_uses> [ttl, e.g. 30m, 12h, 7d]",
            Command::DeactivateCode => "/deactivatecode <code>",
            Command::CodeStats => "/codestats <code>",
            Command::DailyStats => "/dailystats [days]",
            Command::TopRef => "/topref [limit]",
            Command::AddAdmin => "/addadmin <user_id>",
            Command::RemoveAdmin => "/removeadmin <user_id>",
            Command::FreeCredits => "/freecredits on|off",
            _ => "",
        }
    }
}

/// A command extracted from message text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    /// Lower-cased name without the slash or bot mention.
    pub name: String,
    pub args: Vec<String>,
    /// Everything after the command token, whitespace preserved.
    pub rest: String,
}

/// Parse `/name[@bot] args...`. Commands addressed to another bot are ignored.
pub fn parse_command(text: &str, bot_username: &str) -> Option<ParsedCommand> {
    let text = text.trim_start();
    let body = text.strip_prefix('/')?;
    let token_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let (token, rest) = body.split_at(token_end);

    let (name, mention) = match token.split_once('@') {
        Some((name, mention)) => (name, Some(mention)),
        None => (token, None),
    };
    if name.is_empty() {
        return None;
    }
    if let Some(mention) = mention
        && !mention.eq_ignore_ascii_case(bot_username)
    {
        return None;
    }

    let rest = rest.trim().to_string();
    Some(ParsedCommand {
        name: name.to_lowercase(),
        args: rest.split_whitespace().map(str::to_string).collect(),
        rest,
    })
}

/// Text after the first `skip` whitespace-separated tokens of `rest`.
pub fn rest_after(rest: &str, skip: usize) -> &str {
    let mut remaining = rest.trim_start();
    for _ in 0..skip {
        let end = remaining.find(char::is_whitespace).unwrap_or(remaining.len());
        remaining = remaining[end..].trim_start();
    }
    remaining.trim_end()
}

/// Largest credit amount or use count a single command may carry.
pub const MAX_AMOUNT: i64 = 1_000_000;

/// A command was called with missing or malformed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgError {
    pub usage: &'static str,
}

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "❌ Use: {}", self.usage)
    }
}

impl std::error::Error for ArgError {}

/// Positional argument access bound to a usage string.
pub struct Args<'a> {
    args: &'a [String],
    usage: &'static str,
}

impl<'a> Args<'a> {
    pub fn new(args: &'a [String], usage: &'static str) -> Self {
        Self { args, usage }
    }

    fn err(&self) -> ArgError {
        ArgError { usage: self.usage }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn text(&self, index: usize) -> Result<&'a str, ArgError> {
        self.args.get(index).map(String::as_str).ok_or_else(|| self.err())
    }

    pub fn user_id(&self, index: usize) -> Result<i64, ArgError> {
        self.text(index)?.parse::<i64>().ok().filter(|id| *id > 0).ok_or_else(|| self.err())
    }

    /// A strictly positive integer no larger than [`MAX_AMOUNT`].
    pub fn amount(&self, index: usize) -> Result<i64, ArgError> {
        self.text(index)?
            .parse::<i64>()
            .ok()
            .filter(|n| (1..=MAX_AMOUNT).contains(n))
            .ok_or_else(|| self.err())
    }

    /// Optional positive number; absent or malformed falls back to `default`.
    pub fn number_or(&self, index: usize, default: usize) -> usize {
        self.args
            .get(index)
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(default)
    }

    /// Optional code lifetime such as `30m`, `12h` or `7d`.
    pub fn ttl(&self, index: usize) -> Result<Option<chrono::Duration>, ArgError> {
        match self.args.get(index) {
            None => Ok(None),
            Some(s) => parse_ttl(s).map(Some).ok_or_else(|| self.err()),
        }
    }
}

static TTL_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,6})([mhd])$").expect("static regex"));

/// Parse `<n>m`, `<n>h` or `<n>d` into a duration.
pub fn parse_ttl(input: &str) -> Option<chrono::Duration> {
    let caps = TTL_PATTERN.captures(input.trim())?;
    let n: i64 = caps[1].parse().ok()?;
    if n == 0 {
        return None;
    }
    match &caps[2] {
        "m" => Some(chrono::Duration::minutes(n)),
        "h" => Some(chrono::Duration::hours(n)),
        "d" => Some(chrono::Duration::days(n)),
        _ => None,
    }
}

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random 8-character redeem code.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..8)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
