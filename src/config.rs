use std::env;
use std::time::Duration;

use crate::error::{QueryError, Result};
use crate::logging::{init_logger, LogFormat};
use crate::resolver::duration::parse_duration;
use crate::resolver::macros::{DEFAULT_MAX_DATA_POINTS, DEFAULT_RATE_INTERVAL};

pub const DEFAULT_URL: &str = "http://localhost:3000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub org_id: Option<String>,
    pub timeout: Duration,
    pub max_response_bytes: usize,
    pub rate_interval: Duration,
    pub max_data_points: u32,
    pub log_format: LogFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            api_key: None,
            org_id: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            rate_interval: DEFAULT_RATE_INTERVAL,
            max_data_points: DEFAULT_MAX_DATA_POINTS,
            log_format: LogFormat::Compact,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Reads the configuration from the process environment, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("GRAFANA_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        let api_key = lookup("GRAFANA_SERVICE_ACCOUNT_TOKEN")
            .or_else(|| lookup("GRAFANA_API_KEY"))
            .filter(|k| !k.is_empty());

        let org_id = lookup("GRAFANA_ORG_ID").filter(|o| !o.is_empty());

        let timeout_secs = parse_number("OBSQ_TIMEOUT_SECS", lookup("OBSQ_TIMEOUT_SECS"), DEFAULT_TIMEOUT_SECS)?;
        let max_response_bytes = parse_number(
            "OBSQ_MAX_RESPONSE_BYTES",
            lookup("OBSQ_MAX_RESPONSE_BYTES"),
            DEFAULT_MAX_RESPONSE_BYTES,
        )?;
        let max_data_points = parse_number(
            "OBSQ_MAX_DATA_POINTS",
            lookup("OBSQ_MAX_DATA_POINTS"),
            DEFAULT_MAX_DATA_POINTS,
        )?;

        let rate_interval = match lookup("OBSQ_RATE_INTERVAL") {
            Some(raw) => parse_duration(&raw).map_err(|e| QueryError::Config(format!("OBSQ_RATE_INTERVAL: {}", e)))?,
            None => DEFAULT_RATE_INTERVAL,
        };

        let log_format = lookup("OBSQ_LOG_FORMAT")
            .map(|f| LogFormat::from_env_value(&f))
            .unwrap_or_default();

        let config = Self {
            url,
            api_key,
            org_id,
            timeout: Duration::from_secs(timeout_secs),
            max_response_bytes,
            rate_interval,
            max_data_points,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(QueryError::Config(format!("url must be http(s): {}", self.url)));
        }
        if self.timeout.is_zero() {
            return Err(QueryError::Config("timeout must be positive".to_string()));
        }
        if self.max_data_points == 0 {
            return Err(QueryError::Config("max data points must be positive".to_string()));
        }
        if self.rate_interval.as_millis() == 0 {
            return Err(QueryError::Config("rate interval must be at least 1ms".to_string()));
        }
        Ok(())
    }

    /// Installs the global subscriber in the format chosen by `OBSQ_LOG_FORMAT`.
    pub fn init_logging(&self, target: &str) -> Result<()> {
        init_logger(target, self.log_format)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| QueryError::Config(format!("{} is not a valid number: {:?}", key, value))),
    }
}
