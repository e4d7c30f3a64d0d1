use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.agent-foundry/config.toml`.
///
/// **Security**: This struct NEVER stores API keys or bot tokens. Sections
/// only carry the *name* of the env var to read; secrets are resolved at
/// startup through [`CredentialProvider`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub patterns: PatternsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Config {
    /// Load config from `~/.agent-foundry/config.toml`, falling back to
    /// defaults when the file does not exist. Environment overrides are
    /// applied before validation.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let mut cfg = if path.exists() {
            Self::parse_file(&path)?
        } else {
            Config::default()
        };
        cfg.apply_env_overrides(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let mut cfg = Self::parse_file(&path)?;
        cfg.apply_env_overrides(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn parse_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `BUDGET_LIMIT`, `BUDGET_ALERT`, `MAX_RETRIES`, `RETRY_BASE_DELAY`,
    /// `QUEUE_STORE` and `PATTERN_STORE` from the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BUDGET_LIMIT") {
            self.budget.monthly_limit = parse_env("BUDGET_LIMIT", &v)?;
        }
        if let Some(v) = lookup("BUDGET_ALERT") {
            self.budget.alert_threshold = parse_env("BUDGET_ALERT", &v)?;
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            self.retry.max_retries = parse_env("MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("RETRY_BASE_DELAY") {
            self.retry.base_delay_ms = parse_env("RETRY_BASE_DELAY", &v)?;
        }
        if let Some(v) = lookup("QUEUE_STORE") {
            self.queue.store_path = v;
        }
        if let Some(v) = lookup("PATTERN_STORE") {
            self.patterns.store_path = v;
        }
        Ok(())
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.budget.validate()?;
        self.queue.validate()?;
        Ok(())
    }

    fn default_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{key}: cannot parse {raw:?}")))
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agent-foundry")
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            data_dir: None,
        }
    }
}

impl GeneralConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir)
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// Monthly spend ceiling and alert threshold, in USD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_monthly_limit")]
    pub monthly_limit: f64,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_limit: default_monthly_limit(),
            alert_threshold: default_alert_threshold(),
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monthly_limit <= 0.0 || self.monthly_limit.is_nan() {
            return Err(ConfigError::Validation(format!(
                "budget.monthly_limit must be positive, got {}",
                self.monthly_limit
            )));
        }
        if self.alert_threshold > self.monthly_limit {
            return Err(ConfigError::Validation(format!(
                "budget.alert_threshold ({}) exceeds monthly_limit ({})",
                self.alert_threshold, self.monthly_limit
            )));
        }
        Ok(())
    }
}

fn default_monthly_limit() -> f64 {
    20.0
}
fn default_alert_threshold() -> f64 {
    18.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_store")]
    pub store_path: String,
    /// Maximum job starts per rolling hour.
    #[serde(default = "default_rate_limit_per_hour")]
    pub rate_limit_per_hour: u32,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Local hour targeted by off-peak scheduling.
    #[serde(default = "default_off_peak_hour")]
    pub off_peak_hour: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause between consecutive jobs.
    #[serde(default = "default_idle_pause_ms")]
    pub idle_pause_ms: u64,
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,
    #[serde(default = "default_completed_keep")]
    pub completed_keep: u32,
    #[serde(default = "default_failed_retention_secs")]
    pub failed_retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store_path: default_queue_store(),
            rate_limit_per_hour: default_rate_limit_per_hour(),
            attempts: default_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            off_peak_hour: default_off_peak_hour(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_pause_ms: default_idle_pause_ms(),
            completed_retention_secs: default_completed_retention_secs(),
            completed_keep: default_completed_keep(),
            failed_retention_secs: default_failed_retention_secs(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_per_hour == 0 {
            return Err(ConfigError::Validation(
                "queue.rate_limit_per_hour must be at least 1".into(),
            ));
        }
        if self.off_peak_hour > 23 {
            return Err(ConfigError::Validation(format!(
                "queue.off_peak_hour must be 0-23, got {}",
                self.off_peak_hour
            )));
        }
        if self.attempts == 0 {
            return Err(ConfigError::Validation(
                "queue.attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_queue_store() -> String {
    default_data_dir()
        .join("queue.db")
        .to_string_lossy()
        .into_owned()
}
fn default_rate_limit_per_hour() -> u32 {
    5
}
fn default_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    5000
}
fn default_off_peak_hour() -> u32 {
    2
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_idle_pause_ms() -> u64 {
    2000
}
fn default_completed_retention_secs() -> u64 {
    86_400
}
fn default_completed_keep() -> u32 {
    100
}
fn default_failed_retention_secs() -> u64 {
    604_800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternsConfig {
    #[serde(default = "default_pattern_store")]
    pub store_path: String,
    #[serde(default = "default_similar_count")]
    pub similar_count: usize,
    #[serde(default = "default_checkpoint_retention_days")]
    pub checkpoint_retention_days: u32,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            store_path: default_pattern_store(),
            similar_count: default_similar_count(),
            checkpoint_retention_days: default_checkpoint_retention_days(),
        }
    }
}

fn default_pattern_store() -> String {
    default_data_dir()
        .join("patterns.db")
        .to_string_lossy()
        .into_owned()
}
fn default_similar_count() -> usize {
    3
}
fn default_checkpoint_retention_days() -> u32 {
    30
}

/// LLM provider settings. Keys are referenced by env var name only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_anthropic_env")]
    pub anthropic_key_env: String,
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,
    #[serde(default = "default_google_env")]
    pub google_key_env: String,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
    /// Model used for the coordination role on the secondary provider.
    #[serde(default = "default_secondary_model")]
    pub secondary_model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            anthropic_key_env: default_anthropic_env(),
            anthropic_base_url: default_anthropic_base_url(),
            google_key_env: default_google_env(),
            gemini_base_url: default_gemini_base_url(),
            secondary_model: default_secondary_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_anthropic_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_google_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_secondary_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_request_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_telegram_token_env")]
    pub telegram_token_env: String,
    #[serde(default = "default_telegram_chat_env")]
    pub telegram_chat_env: String,
    /// Minimum spacing between two deliveries.
    #[serde(default = "default_spacing_ms")]
    pub spacing_ms: u64,
    /// Redeliveries after a failed first attempt.
    #[serde(default = "default_notify_retries")]
    pub max_retries: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            telegram_token_env: default_telegram_token_env(),
            telegram_chat_env: default_telegram_chat_env(),
            spacing_ms: default_spacing_ms(),
            max_retries: default_notify_retries(),
        }
    }
}

fn default_telegram_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".into()
}
fn default_telegram_chat_env() -> String {
    "TELEGRAM_CHAT_ID".into()
}
fn default_spacing_ms() -> u64 {
    100
}
fn default_notify_retries() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Secrets resolved at startup. Never serialized.
#[derive(Clone)]
pub struct Credentials {
    pub anthropic_api_key: String,
    pub google_api_key: String,
    pub telegram: Option<TelegramCredentials>,
}

#[derive(Clone)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("anthropic_api_key", &"<redacted>")
            .field("google_api_key", &"<redacted>")
            .field("telegram", &self.telegram.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Resolves credentials from environment variables.
pub struct CredentialProvider;

impl CredentialProvider {
    /// Read a credential from a named env var. Empty values count as unset.
    pub fn from_env(var_name: &str) -> Option<String> {
        std::env::var(var_name).ok().filter(|v| !v.trim().is_empty())
    }

    /// Resolve every credential named by `config` from the process environment.
    pub fn resolve(config: &Config) -> Result<Credentials, ConfigError> {
        Self::resolve_with(config, Self::from_env)
    }

    /// Resolve credentials through an arbitrary lookup. Provider keys are
    /// required; Telegram is optional and needs both token and chat id.
    pub fn resolve_with<F>(config: &Config, lookup: F) -> Result<Credentials, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| ConfigError::MissingCredential(name.to_string()))
        };
        let anthropic_api_key = required(&config.providers.anthropic_key_env)?;
        let google_api_key = required(&config.providers.google_key_env)?;

        let telegram = match (
            lookup(&config.notifications.telegram_token_env),
            lookup(&config.notifications.telegram_chat_env),
        ) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramCredentials { bot_token, chat_id }),
            _ => None,
        };

        Ok(Credentials {
            anthropic_api_key,
            google_api_key,
            telegram,
        })
    }
}
