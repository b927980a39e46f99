use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{QueryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_env_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

fn default_filter(target: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", target, Level::INFO)))
}

/// Installs the global tracing subscriber.
///
/// # Arguments
/// * `target` - Crate or module target used when `RUST_LOG` is unset
/// * `format` - Compact human-readable lines or one JSON object per event
///
/// Fails instead of panicking when a subscriber is already installed, so
/// embedding applications can own logging themselves.
pub fn init_logger(target: &str, format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(default_filter(target));

    let installed = match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_names(true)
                    .with_level(true)
                    .with_ansi(true)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    installed.map_err(|e| QueryError::Config(format!("failed to initialize logger: {}", e)))
}
