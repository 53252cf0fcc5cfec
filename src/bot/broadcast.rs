//! Sequential fan-out of admin messages.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use teloxide::types::ChatId;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::telegram::Messenger;
use super::{BotState, Caller};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Send `text` to each recipient in order, pausing `delay` between sends.
/// A failed send is counted and the loop moves on.
pub async fn deliver<M: Messenger>(messenger: &M, recipients: &[i64], text: &str, delay: Duration) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for (i, &user_id) in recipients.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match messenger.send_text(ChatId(user_id), text).await {
            Ok(()) => report.delivered += 1,
            Err(_) => report.failed += 1,
        }
    }

    report
}

/// Run a broadcast in the background, then log it and report to the admin.
pub fn spawn<M: Messenger>(
    state: Arc<BotState>,
    messenger: M,
    admin: Caller,
    recipients: Vec<i64>,
    text: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("📣 Broadcast by {} to {} users started", admin.id(), recipients.len());
        let delay = Duration::from_millis(state.config.broadcast_delay_ms);
        let report = deliver(&messenger, &recipients, &text, delay).await;
        info!("📣 Broadcast finished: {} delivered, {} failed", report.delivered, report.failed);

        if let Err(e) = state.db.log_broadcast(admin.id(), &text, report.delivered, report.failed, Utc::now()) {
            warn!("Failed to log broadcast: {e}");
        }

        let summary = format!(
            "📣 Broadcast finished\n✅ Delivered: {}\n❌ Failed: {}",
            report.delivered, report.failed
        );
        if let Err(e) = messenger.send_text(admin.chat_id, &summary).await {
            warn!("Failed to report broadcast result: {e}");
        }
    })
}
