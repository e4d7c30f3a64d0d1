use af_core::config::{GeneralConfig, LogFormat};
use tracing_subscriber::{fmt, EnvFilter};

/// The filter directive in effect: a non-empty `RUST_LOG` wins over the
/// configured level.
pub fn effective_directive(rust_log: Option<&str>, default_level: &str) -> String {
    match rust_log.map(str::trim) {
        Some(env) if !env.is_empty() => env.to_string(),
        _ => default_level.to_string(),
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    let env = std::env::var("RUST_LOG").ok();
    EnvFilter::new(effective_directive(env.as_deref(), default_level))
}

/// Initialize logging with human-readable output format.
///
/// `default_level` accepts any `EnvFilter` directive (e.g. "info" or
/// "af_agents=debug,warn"). Safe to call multiple times; later calls are
/// no-ops.
pub fn init_logging(service_name: &str, default_level: &str) {
    fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (human-readable)");
}

/// Initialize logging with one JSON object per line.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    fmt()
        .json()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_current_span(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (json)");
}

/// Initialize logging from the `[general]` config section.
pub fn init_from_config(service_name: &str, general: &GeneralConfig) {
    match general.log_format {
        LogFormat::Pretty => init_logging(service_name, &general.log_level),
        LogFormat::Json => init_logging_json(service_name, &general.log_level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_overrides_default() {
        assert_eq!(effective_directive(Some("af_agents=debug"), "info"), "af_agents=debug");
    }

    #[test]
    fn blank_rust_log_falls_back() {
        assert_eq!(effective_directive(Some("  "), "warn"), "warn");
        assert_eq!(effective_directive(None, "info"), "info");
    }
}
