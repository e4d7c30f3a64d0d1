use std::time::Duration;

use af_core::config::TelegramCredentials;
use af_core::notification::{AlertChannel, AlertError, Notification};
use af_core::types::Priority;
use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while building a Telegram client.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("missing Telegram bot token")]
    MissingToken,

    #[error("missing Telegram chat id")]
    MissingChatId,
}

/// Used when a 429 response carries no usable `retry-after`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// MarkdownV2
// ---------------------------------------------------------------------------

const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    '\\',
];

/// Escape every MarkdownV2 reserved character with a backslash.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inline code span. Only backtick and backslash need escaping inside it.
fn code(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('`');
    for c in text.chars() {
        if c == '`' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('`');
    out
}

fn bold(text: &str) -> String {
    format!("*{}*", escape_markdown_v2(text))
}

pub fn priority_emoji(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "ℹ️",
        Priority::Medium => "📌",
        Priority::High => "🔔",
        Priority::Critical => "🚨",
    }
}

/// Render a notification as a MarkdownV2 message body:
/// emoji and bold title, message, one bullet per detail, then local time.
pub fn format_notification(n: &Notification) -> String {
    let mut lines = vec![
        format!("{} {}", priority_emoji(n.priority), bold(&n.title)),
        String::new(),
        escape_markdown_v2(&n.message),
    ];

    if !n.details.is_empty() {
        lines.push(String::new());
        for (key, value) in &n.details {
            lines.push(format!("• {}: {}", bold(key), code(value)));
        }
    }

    lines.push(String::new());
    let time = n.timestamp.with_timezone(&Local).format("%H:%M:%S").to_string();
    lines.push(format!("_{}_", escape_markdown_v2(&time)));
    lines.join("\n")
}

/// Wait requested by a 429 `retry-after` header, in whole seconds.
/// Missing, unparsable or zero values fall back to [`DEFAULT_RETRY_AFTER`].
pub fn retry_after_hint(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Delivers notifications through the Telegram Bot API `sendMessage` call.
///
/// One call per [`deliver`](AlertChannel::deliver). Spacing and retries are
/// the caller's job; a 429 surfaces as [`AlertError::RateLimited`].
#[derive(Debug, Clone)]
pub struct TelegramChannel {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
    base_url: String,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, TelegramError> {
        if bot_token.is_empty() {
            return Err(TelegramError::MissingToken);
        }
        if chat_id.is_empty() {
            return Err(TelegramError::MissingChatId);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            base_url: "https://api.telegram.org".to_string(),
        })
    }

    pub fn from_credentials(creds: &TelegramCredentials) -> Result<Self, TelegramError> {
        Self::new(&creds.bot_token, &creds.chat_id)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.bot_token)
    }
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    async fn deliver(&self, notification: &Notification) -> Result<(), AlertError> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": format_notification(notification),
            "parse_mode": "MarkdownV2",
        });

        let resp = self
            .client
            .post(self.send_message_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AlertError::RateLimited {
                retry_after: retry_after_hint(resp.headers()),
            });
        }

        let status = resp.status();
        let api: BotApiResponse = resp
            .json()
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;
        if !status.is_success() || !api.ok {
            return Err(AlertError::Rejected(
                api.description.unwrap_or_else(|| status.to_string()),
            ));
        }

        debug!(kind = %notification.kind, "telegram notification delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use af_core::notification::NotificationKind;

    #[test]
    fn escapes_every_reserved_character() {
        let raw = "_*[]()~`>#+-=|{}.!\\";
        let escaped = escape_markdown_v2(raw);
        assert_eq!(escaped.len(), raw.len() * 2);
        assert!(escaped.starts_with("\\_\\*"));
    }

    #[test]
    fn plain_text_untouched() {
        assert_eq!(escape_markdown_v2("hello world 42"), "hello world 42");
    }

    #[test]
    fn code_span_escapes_only_backtick_and_backslash() {
        assert_eq!(code("$0.42"), "`$0.42`");
        assert_eq!(code("a`b\\c"), "`a\\`b\\\\c`");
    }

    #[test]
    fn format_has_title_message_details_and_time() {
        let n = Notification::new(
            NotificationKind::FeatureCompleted,
            Priority::High,
            "Feature F-1 done",
            "Cost was fine.",
        )
        .detail("cost", "$0.42")
        .detail("success_rate", "86%");
        let text = format_notification(&n);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "🔔 *Feature F\\-1 done*");
        assert_eq!(lines[2], "Cost was fine\\.");
        assert_eq!(lines[4], "• *cost*: `$0.42`");
        assert_eq!(lines[5], "• *success\\_rate*: `86%`");
        let last = lines.last().copied().unwrap_or_default();
        assert!(last.starts_with('_') && last.ends_with('_'));
    }

    #[test]
    fn no_detail_block_without_details() {
        let n = Notification::new(NotificationKind::QueueStatus, Priority::Low, "q", "idle");
        let text = format_notification(&n);
        assert_eq!(text.lines().count(), 5);
        assert!(text.starts_with("ℹ️"));
    }

    #[test]
    fn retry_after_header_parsed_as_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after_hint(&headers), Duration::from_secs(7));
    }

    #[test]
    fn unusable_retry_after_falls_back() {
        let empty = reqwest::header::HeaderMap::new();
        assert_eq!(retry_after_hint(&empty), DEFAULT_RETRY_AFTER);

        let mut zero = reqwest::header::HeaderMap::new();
        zero.insert(reqwest::header::RETRY_AFTER, "0".parse().unwrap());
        assert_eq!(retry_after_hint(&zero), DEFAULT_RETRY_AFTER);

        let mut date = reqwest::header::HeaderMap::new();
        date.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(retry_after_hint(&date), DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn missing_credentials_rejected() {
        assert!(matches!(
            TelegramChannel::new("", "1"),
            Err(TelegramError::MissingToken)
        ));
        assert!(matches!(
            TelegramChannel::new("t", ""),
            Err(TelegramError::MissingChatId)
        ));
        let ch = TelegramChannel::new("tok", "42").unwrap();
        assert_eq!(ch.send_message_url(), "https://api.telegram.org/bottok/sendMessage");
    }
}
