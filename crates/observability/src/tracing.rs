//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "NEXCRM_LOG_FORMAT";
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable lines, for local runs.
    Text,
}

impl LogFormat {
    /// Unrecognized values fall back to JSON.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => LogFormat::Text,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives, e.g. `info,nexcrm_auth=debug`.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl LogConfig {
    /// Reads `NEXCRM_LOG_FORMAT` and `RUST_LOG`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            format: lookup(LOG_FORMAT_ENV)
                .map(|raw| LogFormat::parse(&raw))
                .unwrap_or_default(),
            filter: lookup(EnvFilter::DEFAULT_ENV)
                .filter(|raw| !raw.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops). Invalid filter
/// directives fall back to `info`.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_writer(std::io::stderr);

    let _ = match config.format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Text => builder.with_target(true).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_json_at_info() {
        let config = LogConfig::from_lookup(|_| None);
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn reads_format_and_filter() {
        let config = LogConfig::from_lookup(|key| match key {
            LOG_FORMAT_ENV => Some("Pretty".into()),
            "RUST_LOG" => Some("nexcrm_auth=debug".into()),
            _ => None,
        });
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.filter, "nexcrm_auth=debug");
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = LogConfig::default().with_format(LogFormat::Text);
        init(&config);
        init(&config);
    }
}
