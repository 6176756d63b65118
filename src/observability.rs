//! Logging setup and lifecycle events for the server and export binaries.
//!
//! Logs always go to stderr: the exporter may be writing its CSV to stdout.

use std::env;
use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::source::SourceHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Server,
    Export,
}

impl RunKind {
    pub fn component(self) -> &'static str {
        match self {
            RunKind::Server => "impact_server",
            RunKind::Export => "impact_export",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `IMPACT_LOG_LEVEL`, `IMPACT_LOG_FORMAT` and `IMPACT_LOG_TARGET`.
/// Blank or unparsable values keep the defaults.
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();
    LoggingConfig {
        level: env_text("IMPACT_LOG_LEVEL").unwrap_or(defaults.level),
        format: env_text("IMPACT_LOG_FORMAT")
            .and_then(|raw| parse_log_format(&raw))
            .unwrap_or(defaults.format),
        include_target: env_text("IMPACT_LOG_TARGET")
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(defaults.include_target),
    }
}

fn env_text(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_writer(std::io::stderr)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(run: RunKind, config: &LoggingConfig) {
    info!(
        component = run.component(),
        event = "app.start",
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_format = ?config.format
    );
}

/// Called once the listener is up, with the source the routes will query.
pub fn log_app_bind(bound_addr: SocketAddr, health: &SourceHealth) {
    info!(
        component = RunKind::Server.component(),
        event = "app.bind",
        bind_addr = %bound_addr,
        page_url = %format!("http://{bound_addr}/impact/page"),
        source = health.kind,
        source_rows = health.rows
    );
}

/// `origin` names the env var that picked the source, or `default`.
pub fn log_source_selected(run: RunKind, health: &SourceHealth, origin: &str) {
    info!(
        component = run.component(),
        event = "source.selected",
        source = health.kind,
        origin,
        rows = health.rows,
        first_minute_ts = health.first_minute_ts,
        last_minute_ts = health.last_minute_ts,
        files_skipped = health.files_skipped,
        endpoint = health.endpoint.as_deref()
    );
}

/// `output` is `None` when the CSV goes to stdout.
pub fn log_export_target(posts_path: &Path, posts_loaded: usize, output: Option<&Path>) {
    info!(
        component = RunKind::Export.component(),
        event = "export.target",
        posts_path = %posts_path.display(),
        posts_loaded,
        output = %output.map_or_else(|| "stdout".to_string(), |path| path.display().to_string())
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const VARS: [&str; 3] = ["IMPACT_LOG_LEVEL", "IMPACT_LOG_FORMAT", "IMPACT_LOG_TARGET"];

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    /// Sets the three logging vars (`None` removes one), reads the config,
    /// then restores whatever was there before.
    fn config_with(values: [Option<&str>; 3]) -> LoggingConfig {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<Option<String>> = VARS.iter().map(|key| env::var(key).ok()).collect();

        for (key, value) in VARS.iter().zip(values) {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
        let cfg = logging_config_from_env();
        for (key, value) in VARS.iter().zip(previous) {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        cfg
    }

    #[test]
    fn defaults_when_env_missing() {
        assert_eq!(config_with([None, None, None]), LoggingConfig::default());
    }

    #[test]
    fn reads_level_format_and_target() {
        let cfg = config_with([Some("tweet_impact=debug"), Some(" JSON "), Some("off")]);
        assert_eq!(cfg.level, "tweet_impact=debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn blank_or_unknown_values_keep_defaults() {
        let cfg = config_with([Some("   "), Some("yaml"), Some("maybe")]);
        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn run_kinds_name_their_binaries() {
        assert_eq!(RunKind::Server.component(), "impact_server");
        assert_eq!(RunKind::Export.component(), "impact_export");
    }
}
