use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use teloxide::types::{ChatId, UserId};

use crate::bot::command::BUILTIN_COMMANDS;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// An environment override could not be parsed.
    Env { var: &'static str, value: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Env { var, value } => {
                write!(f, "invalid value for environment variable {var}: '{value}'")
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Env { .. } | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    owner_id: u64,
    #[serde(default)]
    admin_ids: Vec<u64>,
    #[serde(default = "default_credits")]
    default_credits: i64,
    #[serde(default = "default_referral_credit")]
    referral_credit: i64,
    /// Channels a user must join before the bot serves them.
    #[serde(default)]
    force_channels: Vec<ForceChannelFile>,
    /// Lookup commands keyed by command name (e.g. "num", "vehicle").
    #[serde(default)]
    lookups: BTreeMap<String, LookupFile>,
    /// Substrings removed from upstream responses.
    #[serde(default)]
    blocklist: Vec<String>,
    #[serde(default = "default_true")]
    drop_emptied: bool,
    /// Footer appended to every lookup reply.
    branding: Option<String>,
    /// Who to contact for buying credits (shown by /buy).
    buy_contact: Option<String>,
    /// Sent to users who message the bot privately while it is group-only.
    private_redirect: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    http_timeout_secs: u64,
    #[serde(default = "default_fetch_attempts")]
    fetch_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    retry_base_delay_ms: u64,
    #[serde(default = "default_true")]
    refund_failed_lookups: bool,
    #[serde(default = "default_broadcast_delay_ms")]
    broadcast_delay_ms: u64,
    /// Initial value of the runtime toggle; the stored setting wins afterwards.
    #[serde(default = "default_true")]
    free_credits_on_join: bool,
    #[serde(default)]
    premium_for_all: bool,
    log_chat_id: Option<i64>,
    /// Directory for state files (logs, database). Defaults to current directory.
    data_dir: Option<String>,
    database_path: Option<String>,
}

#[derive(Deserialize)]
struct ForceChannelFile {
    id: i64,
    link: String,
}

#[derive(Deserialize)]
struct LookupFile {
    url: String,
    #[serde(default)]
    description: String,
    log_channel: Option<i64>,
    #[serde(default = "default_true")]
    scrub: bool,
}

fn default_credits() -> i64 {
    5
}

fn default_referral_credit() -> i64 {
    3
}

fn default_true() -> bool {
    true
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_broadcast_delay_ms() -> u64 {
    50
}

/// A channel users must be a member of.
#[derive(Debug, Clone)]
pub struct ForceChannel {
    pub id: ChatId,
    pub link: Url,
}

/// One configured lookup command.
#[derive(Debug, Clone)]
pub struct LookupEndpoint {
    pub name: String,
    /// URL template. `{input}` is substituted, otherwise the input is appended.
    pub url: String,
    pub description: String,
    /// Audit channel receiving a copy of every successful lookup.
    pub log_channel: Option<ChatId>,
    pub scrub: bool,
}

pub struct Config {
    pub telegram_bot_token: String,
    pub owner_id: UserId,
    /// Admins from configuration. Admins granted at runtime live in the database.
    pub admin_ids: HashSet<UserId>,
    pub default_credits: i64,
    pub referral_credit: i64,
    pub force_channels: Vec<ForceChannel>,
    pub lookups: BTreeMap<String, LookupEndpoint>,
    pub blocklist: Vec<String>,
    pub drop_emptied: bool,
    pub branding: Option<String>,
    pub buy_contact: Option<String>,
    pub private_redirect: Option<String>,
    pub http_timeout_secs: u64,
    pub fetch_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub refund_failed_lookups: bool,
    pub broadcast_delay_ms: u64,
    pub free_credits_on_join: bool,
    pub premium_for_all: bool,
    pub log_chat_id: Option<ChatId>,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
}

impl Config {
    /// Load the config file and apply overrides from the process environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |var| std::env::var(var).ok())
    }

    /// Load the config file, resolving overrides through `env`.
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let mut file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if let Some(token) = env("BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            file.telegram_bot_token = token.trim().to_string();
        }
        if let Some(owner) = env("OWNER_ID").filter(|v| !v.trim().is_empty()) {
            file.owner_id = owner
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var: "OWNER_ID", value: owner.clone() })?;
        }
        if let Some(admins) = env("ADMIN_IDS") {
            for part in admins.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let id = part
                    .parse()
                    .map_err(|_| ConfigError::Env { var: "ADMIN_IDS", value: admins.clone() })?;
                file.admin_ids.push(id);
            }
        }
        if let Some(db_path) = env("DATABASE_PATH").filter(|v| !v.trim().is_empty()) {
            file.database_path = Some(db_path.trim().to_string());
        }

        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.owner_id == 0 {
            return Err(ConfigError::Validation("owner_id is required".into()));
        }
        if file.default_credits < 0 || file.referral_credit < 0 {
            return Err(ConfigError::Validation("credit amounts must not be negative".into()));
        }
        if file.fetch_attempts == 0 {
            return Err(ConfigError::Validation("fetch_attempts must be at least 1".into()));
        }

        let name_pattern = Regex::new(r"^[a-z0-9_]{1,32}$").expect("static regex");
        let mut lookups = BTreeMap::new();
        for (name, entry) in file.lookups {
            if !name_pattern.is_match(&name) {
                return Err(ConfigError::Validation(format!(
                    "lookup command '{name}' must be 1-32 lowercase letters, digits or underscores"
                )));
            }
            if BUILTIN_COMMANDS.contains(&name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "lookup command '{name}' collides with a built-in command"
                )));
            }
            let url = entry.url.trim().to_string();
            if url.is_empty() {
                return Err(ConfigError::Validation(format!("lookup '{name}' has no url")));
            }
            let probe = url.replace("{input}", "probe");
            if Url::parse(&probe).is_err() {
                return Err(ConfigError::Validation(format!("lookup '{name}' has an invalid url: {url}")));
            }
            lookups.insert(
                name.clone(),
                LookupEndpoint {
                    name,
                    url,
                    description: entry.description,
                    log_channel: entry.log_channel.map(ChatId),
                    scrub: entry.scrub,
                },
            );
        }

        let force_channels = file
            .force_channels
            .into_iter()
            .map(|ch| {
                Url::parse(&ch.link)
                    .map(|link| ForceChannel { id: ChatId(ch.id), link })
                    .map_err(|_| ConfigError::Validation(format!("force channel {} has an invalid link", ch.id)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let blocklist = file.blocklist.into_iter().filter(|b| !b.is_empty()).collect();

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let database_path = file
            .database_path
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("lookupbot.db"));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            owner_id: UserId(file.owner_id),
            admin_ids: file.admin_ids.into_iter().map(UserId).collect(),
            default_credits: file.default_credits,
            referral_credit: file.referral_credit,
            force_channels,
            lookups,
            blocklist,
            drop_emptied: file.drop_emptied,
            branding: file.branding.filter(|b| !b.trim().is_empty()),
            buy_contact: file.buy_contact,
            private_redirect: file.private_redirect,
            http_timeout_secs: file.http_timeout_secs,
            fetch_attempts: file.fetch_attempts,
            retry_base_delay_ms: file.retry_base_delay_ms,
            refund_failed_lookups: file.refund_failed_lookups,
            broadcast_delay_ms: file.broadcast_delay_ms,
            free_credits_on_join: file.free_credits_on_join,
            premium_for_all: file.premium_for_all,
            log_chat_id: file.log_chat_id.map(ChatId),
            data_dir,
            database_path,
        })
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }

    pub fn lookup(&self, name: &str) -> Option<&LookupEndpoint> {
        self.lookups.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config() {
        let file = write_config(r#"{
            "owner_id": 123456,
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "lookups": {
                "num": { "url": "https://api.example.com/num?q=", "log_channel": -1001 },
                "ip": { "url": "https://api.example.com/ip/{input}/json", "scrub": false }
            },
            "force_channels": [{ "id": -100500, "link": "https://t.me/example" }]
        }"#);
        let config = Config::load_with_env(file.path(), no_env).expect("should load valid config");
        assert_eq!(config.owner_id, UserId(123456));
        assert_eq!(config.default_credits, 5);
        assert_eq!(config.referral_credit, 3);
        assert_eq!(config.fetch_attempts, 3);
        assert!(config.refund_failed_lookups);
        assert_eq!(config.lookups.len(), 2);
        assert_eq!(config.lookup("num").unwrap().log_channel, Some(ChatId(-1001)));
        assert!(!config.lookup("ip").unwrap().scrub);
        assert_eq!(config.force_channels.len(), 1);
        assert_eq!(config.database_path, PathBuf::from("./lookupbot.db"));
    }

    #[test]
    fn test_env_overrides() {
        let file = write_config(r#"{ "owner_id": 1, "telegram_bot_token": "1:abc" }"#);
        let env: HashMap<&str, &str> = HashMap::from([
            ("BOT_TOKEN", "999:secret"),
            ("OWNER_ID", "42"),
            ("ADMIN_IDS", "7, 8,"),
            ("DATABASE_PATH", "/var/lib/bot.db"),
        ]);
        let config = Config::load_with_env(file.path(), |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.telegram_bot_token, "999:secret");
        assert_eq!(config.owner_id, UserId(42));
        assert!(config.admin_ids.contains(&UserId(7)));
        assert!(config.admin_ids.contains(&UserId(8)));
        assert_eq!(config.database_path, PathBuf::from("/var/lib/bot.db"));
    }

    #[test]
    fn test_bad_env_owner() {
        let file = write_config(r#"{ "owner_id": 1, "telegram_bot_token": "1:abc" }"#);
        let err = assert_err(Config::load_with_env(file.path(), |k| {
            (k == "OWNER_ID").then(|| "not-a-number".to_string())
        }));
        assert!(matches!(err, ConfigError::Env { var: "OWNER_ID", .. }));
    }

    #[test]
    fn test_missing_owner() {
        let file = write_config(r#"{ "telegram_bot_token": "123456789:ABCdef" }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("owner_id"));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{ "owner_id": 123, "telegram_bot_token": "" }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format() {
        for token in ["invalid_token_no_colon", "notanumber:ABCdef", "123456789:"] {
            let file = write_config(&format!(r#"{{ "owner_id": 123, "telegram_bot_token": "{token}" }}"#));
            let err = assert_err(Config::load_with_env(file.path(), no_env));
            assert!(matches!(err, ConfigError::Validation(_)), "token {token}");
        }
    }

    #[test]
    fn test_lookup_without_url() {
        let file = write_config(r#"{
            "owner_id": 1,
            "telegram_bot_token": "1:abc",
            "lookups": { "num": { "url": "  " } }
        }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(err.to_string().contains("num"));
    }

    #[test]
    fn test_lookup_name_collides_with_builtin() {
        let file = write_config(r#"{
            "owner_id": 1,
            "telegram_bot_token": "1:abc",
            "lookups": { "redeem": { "url": "https://api.example.com/?q=" } }
        }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(err.to_string().contains("built-in"));
    }

    #[test]
    fn test_invalid_force_channel_link() {
        let file = write_config(r#"{
            "owner_id": 1,
            "telegram_bot_token": "1:abc",
            "force_channels": [{ "id": -1, "link": "not a url" }]
        }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load_with_env("/nonexistent/path/config.json", no_env));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
