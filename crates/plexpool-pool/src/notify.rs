//! Notification sink for monitor state changes.
//!
//! When both Telegram fields of the monitor config are set, state-change
//! events are delivered to the configured chat; otherwise they are only
//! logged. Delivery failures never fail a health check.

use crate::config::MonitorConfig;
use teloxide::prelude::*;
use tracing::{info, warn};

/// Deliver one notification event.
pub async fn send(config: &MonitorConfig, subject: &str, body: &str) {
    if !config.telegram_configured() {
        info!(%subject, %body, "monitor notification");
        return;
    }
    let (Some(token), Some(chat)) = (&config.tg_bot_token, &config.tg_chat_id) else {
        return;
    };
    let chat_id = match chat.parse::<i64>() {
        Ok(id) => ChatId(id),
        Err(_) => {
            warn!(chat = %chat, "tg_chat_id is not a numeric chat id; logging only");
            info!(%subject, %body, "monitor notification");
            return;
        }
    };

    let bot = Bot::new(token);
    let text = format!("{subject}\n\n{body}");
    if let Err(e) = bot.send_message(chat_id, text).await {
        warn!(error = %e, "telegram notification failed");
    }
}
