use af_core::config::{GeneralConfig, LogFormat};
use af_telemetry::logging;

#[test]
fn test_init_logging_human() {
    // Should not panic; second call is a safe no-op.
    logging::init_logging("test-service", "debug");
    logging::init_logging("test-service", "info");

    tracing::info!(feature_id = "FEAT-1", "human-readable log line");
}

#[test]
fn test_init_logging_json() {
    // The global subscriber is already set by whichever test ran first, so
    // this silently no-ops.
    logging::init_logging_json("test-service-json", "info");

    tracing::info!(agent = "architect", cost = 0.12, "json log line");
}

#[test]
fn test_init_from_config_both_formats() {
    let mut general = GeneralConfig::default();
    logging::init_from_config("cfg-pretty", &general);
    general.log_format = LogFormat::Json;
    general.log_level = "af_agents=debug,warn".into();
    logging::init_from_config("cfg-json", &general);
}
