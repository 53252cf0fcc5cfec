//! Telegram client using teloxide.

use std::future::Future;

use teloxide::prelude::*;
use teloxide::types::{BotCommand, InputFile, ParseMode};
use tracing::{debug, warn};

use super::reply::Reply;

/// Outbound side of the bot. Handlers talk to Telegram only through this.
pub trait Messenger: Clone + Send + Sync + 'static {
    /// Send an HTML message.
    fn send_text(&self, chat_id: ChatId, text: &str) -> impl Future<Output = Result<(), String>> + Send;

    fn send_reply(&self, chat_id: ChatId, reply: Reply) -> impl Future<Output = Result<(), String>> + Send;

    /// Whether `user_id` currently belongs to `chat_id`.
    fn is_member(&self, chat_id: ChatId, user_id: UserId) -> impl Future<Output = Result<bool, String>> + Send;
}

/// Telegram API client.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub async fn set_commands(&self, commands: Vec<BotCommand>) -> Result<(), String> {
        self.bot.set_my_commands(commands).await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to set commands: {e}");
            warn!("{}", msg);
            msg
        })
    }

    pub async fn answer_callback(&self, query: &CallbackQuery) {
        if let Err(e) = self.bot.answer_callback_query(query.id.clone()).await {
            debug!("Failed to answer callback query: {e}");
        }
    }
}

impl Messenger for TelegramClient {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<(), String> {
        self.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            // Broadcast failures are routine (blocked bot), keep them out of the ops chat
            .map_err(|e| {
                let msg = format!("Failed to send to {chat_id}: {e}");
                debug!("{}", msg);
                msg
            })
    }

    async fn send_reply(&self, chat_id: ChatId, reply: Reply) -> Result<(), String> {
        let result = match reply.document {
            Some(doc) => {
                let input_file = InputFile::memory(doc.bytes).file_name(doc.file_name);
                let mut request = self.bot.send_document(chat_id, input_file);
                if !reply.text.is_empty() {
                    request = request.caption(reply.text).parse_mode(ParseMode::Html);
                }
                request.await.map(|_| ())
            }
            None => {
                let mut request = self.bot.send_message(chat_id, reply.text).parse_mode(ParseMode::Html);
                if let Some(keyboard) = reply.keyboard {
                    request = request.reply_markup(keyboard);
                }
                request.await.map(|_| ())
            }
        };

        result.map_err(|e| {
            let msg = format!("Failed to send reply: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, String> {
        let member = self
            .bot
            .get_chat_member(chat_id, user_id)
            .await
            .map_err(|e| {
                let msg = format!("Failed to get chat member: {e}");
                warn!("{}", msg);
                msg
            })?;
        Ok(member.is_present())
    }
}
