use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use lookupbot::bot::telegram::{Messenger, TelegramClient};
use lookupbot::bot::{self as handlers, BotState, Caller};
use lookupbot::config::Config;
use lookupbot::store::Database;
use lookupbot::telegram_log;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenv::dotenv() {
        // .env is optional
        if !e.not_found() {
            eprintln!("Failed to load .env: {e}");
        }
    }

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "lookupbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {}: {e}", log_dir.display());
        std::process::exit(1);
    }
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("lookupbot.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(TelegramClient::new(bot.clone()), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting lookupbot...");
    info!("Loaded config from {config_path}");
    info!("Owner: {}, {} lookup command(s)", config.owner_id, config.lookups.len());

    let db = match Database::open(&config.database_path) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database {:?}: {e}", config.database_path);
            std::process::exit(1);
        }
    };

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            me.username().to_string()
        }
        Err(e) => {
            error!("Failed to get bot info: {e}");
            std::process::exit(1);
        }
    };

    let state = match BotState::new(config, db, bot_username) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to build lookup client: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = state.seed_settings() {
        error!("Failed to seed settings: {e}");
        std::process::exit(1);
    }

    let telegram = TelegramClient::new(bot.clone());
    if telegram.set_commands(state.menu_commands()).await.is_err() {
        warn!("Continuing without a command menu");
    }

    let state = Arc::new(state);
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback_query));

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("👋 Shutting down");
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(user) = msg.from.as_ref().filter(|u| !u.is_bot) else {
        return Ok(());
    };

    let caller = Caller {
        user_id: user.id,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
        chat_id: msg.chat.id,
        private: msg.chat.is_private(),
    };

    let telegram = TelegramClient::new(bot);
    if let Some(reply) = handlers::handle_message(&state, &telegram, &caller, text, Utc::now()).await {
        // Failures are logged by the client
        let _ = telegram.send_reply(msg.chat.id, reply).await;
    }
    Ok(())
}

async fn handle_callback_query(bot: Bot, q: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    let telegram = TelegramClient::new(bot);
    telegram.answer_callback(&q).await;

    let (Some(data), Some(message)) = (q.data.as_deref(), q.message.as_ref()) else {
        return Ok(());
    };
    let chat = message.chat();

    let caller = Caller {
        user_id: q.from.id,
        username: q.from.username.clone(),
        first_name: q.from.first_name.clone(),
        chat_id: chat.id,
        private: chat.is_private(),
    };

    if let Some(reply) = handlers::callbacks::handle_callback(&state, &telegram, &caller, data, Utc::now()).await {
        let _ = telegram.send_reply(chat.id, reply).await;
    }
    Ok(())
}
