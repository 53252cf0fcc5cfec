//! Tracing layer that mirrors the bot's own log events into an ops chat.
//!
//! WARN and ERROR events are sent right away. INFO events are batched and
//! flushed every few seconds or once the batch is full. Events from other
//! crates (teloxide, reqwest, ...) are skipped so that sending a log line
//! can never produce more log lines.

use std::time::Duration;

use teloxide::types::ChatId;
use teloxide::utils::html;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::bot::telegram::Messenger;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BATCH_ENTRIES: usize = 50;
const MAX_LOG_CHARS: usize = 4000;

/// Log message with priority.
enum LogMessage {
    /// WARN/ERROR, sent immediately.
    Urgent(String),
    /// INFO, batched.
    Info(String),
}

/// Buffered INFO entries waiting for the next flush.
#[derive(Debug, Default)]
struct LogBatch {
    entries: Vec<String>,
}

impl LogBatch {
    /// Add an entry. Returns the combined batch when it is full.
    fn push(&mut self, entry: String) -> Option<String> {
        self.entries.push(entry);
        if self.entries.len() >= MAX_BATCH_ENTRIES {
            self.take()
        } else {
            None
        }
    }

    fn take(&mut self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let combined = self.entries.join("\n");
        self.entries.clear();
        Some(combined)
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_LOG_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(MAX_LOG_CHARS).collect();
    format!("{truncated}...")
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
    crate_prefix: &'static str,
}

impl TelegramLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new<M: Messenger>(messenger: M, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut batch = LogBatch::default();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(LogMessage::Urgent(text)) => send_log(&messenger, chat_id, &text).await,
                        Some(LogMessage::Info(text)) => {
                            if let Some(full) = batch.push(text) {
                                send_log(&messenger, chat_id, &full).await;
                            }
                        }
                        None => break,
                    },
                    _ = interval.tick() => {
                        if let Some(pending) = batch.take() {
                            send_log(&messenger, chat_id, &pending).await;
                        }
                    }
                }
            }
        });

        Self {
            tx,
            crate_prefix: env!("CARGO_CRATE_NAME"),
        }
    }
}

async fn send_log<M: Messenger>(messenger: &M, chat_id: ChatId, text: &str) {
    if let Err(e) = messenger.send_text(chat_id, &html::escape(&truncate(text))).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > Level::INFO || !metadata.target().starts_with(self.crate_prefix) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let msg = match level {
            Level::ERROR => LogMessage::Urgent(format!("❌ {}", visitor.message)),
            Level::WARN => LogMessage::Urgent(format!("⚠️ {}", visitor.message)),
            _ => LogMessage::Info(visitor.message),
        };

        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
