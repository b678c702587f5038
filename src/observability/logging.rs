//! Logging configuration and utilities.

use std::sync::OnceLock;

use regex::Regex;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{NexusError, NexusResult};

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable single-line output.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directive used when `RUST_LOG` is not set (e.g. `"info"`).
    pub default_directive: String,
    /// Output format.
    pub format: LogFormat,
    /// Maximum prompt characters included in log events.
    pub prompt_preview_chars: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            format: LogFormat::Json,
            prompt_preview_chars: 120,
        }
    }
}

impl LogConfig {
    /// Creates a new log configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default filter directive.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Sets the output format.
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.default_directive`. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> NexusResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_directive))
        .map_err(|e| NexusError::configuration(format!("invalid log directive: {}", e)))?;

    let result = match config.format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Compact => fmt().compact().with_env_filter(filter).try_init(),
    };

    result.map_err(|e| NexusError::configuration(format!("tracing already initialised: {}", e)))
}

fn redaction_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"gsk_[a-zA-Z0-9]+", "gsk_***"),
            (r"sk-[a-zA-Z0-9_-]{8,}", "sk-***"),
            (r"Bearer [a-zA-Z0-9._-]+", "Bearer ***"),
            (r"(?i)api[_-]?key[=:]\s*[^\s,}]+", "api_key=***"),
            (r"(?i)authorization[=:]\s*[^\s,}]+", "authorization=***"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|re| (re, replacement))
        })
        .collect()
    })
}

/// Redacts credentials from text before it is logged.
pub fn redact(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in redaction_patterns() {
        result = re.replace_all(&result, *replacement).into_owned();
    }
    result
}

/// Redacted, single-line preview of a prompt or response.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .take(max_chars)
        .collect();
    let mut out = redact(&flat);
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}
