//! Outbound integrations. Currently one: Telegram alert delivery.

pub mod telegram;

pub use telegram::{TelegramChannel, TelegramError, DEFAULT_RETRY_AFTER};
