//! Telemetry initialization (tracing/tracing-subscriber) from the `[logging]` config section.
//!
//! `level` holds EnvFilter directives (LOG_LEVEL overrides it); `format` is "pretty" or
//! "json" (LOG_FORMAT). Directives that do not parse fall back to the portal defaults.
//!
//! Targets in use:
//! - `assessment_portal`: service lifecycle, configuration and remote transport.
//! - `assessment`: flow events (test acquired, answers submitted, result resolved).

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig, DEFAULT_LOG_DIRECTIVES};

pub fn init_tracing(cfg: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(&cfg.level))
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    match cfg.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn filter_for(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("invalid log directives '{}' ({}); using '{}'", directives, e, DEFAULT_LOG_DIRECTIVES);
        EnvFilter::new(DEFAULT_LOG_DIRECTIVES)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn configured_directives_set_the_level() {
        assert_eq!(filter_for("warn").max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn bad_directives_fall_back_to_defaults() {
        assert_eq!(filter_for("assessment=loudest").max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
