use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

pub const ENV_OBSERVABILITY_ENABLED: &str = "CHAT_RELAY_OBSERVABILITY_ENABLED";
pub const ENV_LOG_LEVEL: &str = "CHAT_RELAY_LOG_LEVEL";
pub const ENV_JSON_LOG_PATH: &str = "CHAT_RELAY_JSON_LOG_PATH";

const DEFAULT_LOG_FILE: &str = "chat-relay.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Logging settings resolved from `CHAT_RELAY_*` variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    /// Filter directive; `None` defers to `RUST_LOG`, then `info`.
    pub level: Option<String>,
    /// JSONL destination; `None` logs compact lines to stderr.
    pub json_log_path: Option<PathBuf>,
}

impl ObservabilitySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup(ENV_OBSERVABILITY_ENABLED)
            .map(|v| parse_bool_env(&v).unwrap_or(true))
            .unwrap_or(true);
        let level = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty());
        let json_log_path = lookup(ENV_JSON_LOG_PATH)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self {
            enabled,
            level,
            json_log_path,
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = self.level.as_deref()
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn split_log_path(path: &Path) -> (&Path, &str) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    (dir, file_name)
}

/// Installs the global tracing subscriber once per process.
///
/// Environment variables:
/// - `CHAT_RELAY_OBSERVABILITY_ENABLED`: enable/disable flag (default enabled).
/// - `CHAT_RELAY_LOG_LEVEL`: filter override (`info`, `chat_relay=debug`, ...).
/// - `CHAT_RELAY_JSON_LOG_PATH`: if set, logs are JSONL in that file. Otherwise
///   they go to stderr in a compact console format, keeping stdout free for
///   streamed replies.
/// - `RUST_LOG`: fallback filter.
pub fn init_observability() {
    INIT.get_or_init(|| install(&ObservabilitySettings::from_env()));
}

fn install(settings: &ObservabilitySettings) {
    if !settings.enabled {
        return;
    }
    // Exactly one sink is active: the JSONL file when configured, else stderr.
    let file_layer = settings.json_log_path.as_deref().map(|path| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(false)
            .with_writer(json_log_writer(path))
    });
    let console_layer = file_layer.is_none().then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let _ = tracing_subscriber::registry()
        .with(settings.env_filter())
        .with(file_layer)
        .with(console_layer)
        .try_init();
}

/// Non-rotating appender for `path`, creating its directory first.
fn json_log_writer(path: &Path) -> tracing_appender::rolling::RollingFileAppender {
    let (dir, file_name) = split_log_path(path);
    let _ = std::fs::create_dir_all(dir);
    tracing_appender::rolling::never(dir, file_name)
}
