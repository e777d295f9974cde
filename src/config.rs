// =============================================================================
// Application configuration — loaded once at startup from the environment
// =============================================================================

use crate::error::ScannerError;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required_env(name: &str) -> Result<String, ScannerError> {
    std::env::var(name)
        .map_err(|_| ScannerError::Configuration(format!("missing required env var {name}")))
}

/// Which upstream market-data vendor feed to subscribe the ingestor to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFeed {
    Iex,
    Sip,
}

impl std::fmt::Display for DataFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iex => write!(f, "iex"),
            Self::Sip => write!(f, "sip"),
        }
    }
}

impl std::str::FromStr for DataFeed {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iex" => Ok(Self::Iex),
            "sip" => Ok(Self::Sip),
            other => Err(ScannerError::Configuration(format!(
                "invalid ALPACA_DATA_FEED value: {other} (expected iex or sip)"
            ))),
        }
    }
}

/// Process-wide configuration resolved once at startup. Everything that
/// never changes without a restart lives here; everything that can be
/// changed at runtime by an admin lives in `ScannerConfig` (src/types.rs).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,

    pub alpaca_key_id: String,
    pub alpaca_secret_key: String,
    pub alpaca_data_feed: DataFeed,

    pub pushover_app_token: String,

    pub scanner_admin_email: String,
    pub scanner_admin_token: String,

    pub bind_addr: String,

    pub retention_days: i64,
    pub universe_poll_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub heartbeat_log_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ScannerError> {
        let alpaca_data_feed: DataFeed = env_or("ALPACA_DATA_FEED", "iex").parse()?;

        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            redis_url: required_env("REDIS_URL")?,
            alpaca_key_id: required_env("ALPACA_API_KEY")?,
            alpaca_secret_key: required_env("ALPACA_SECRET")?,
            alpaca_data_feed,
            pushover_app_token: env_or("PUSHOVER_APP_TOKEN", ""),
            scanner_admin_email: env_or("SCANNER_ADMIN_EMAIL", ""),
            scanner_admin_token: env_or("SCANNER_ADMIN_TOKEN", ""),
            bind_addr: env_or("SCANNER_BIND_ADDR", "0.0.0.0:8090"),
            retention_days: env_or("SCANNER_RETENTION_DAYS", "30")
                .parse()
                .unwrap_or(30),
            universe_poll_interval_secs: env_or("SCANNER_UNIVERSE_POLL_SECS", "30")
                .parse()
                .unwrap_or(30),
            reconnect_delay_secs: env_or("SCANNER_RECONNECT_DELAY_SECS", "5")
                .parse()
                .unwrap_or(5),
            heartbeat_log_interval_secs: env_or("SCANNER_HEARTBEAT_LOG_SECS", "60")
                .parse()
                .unwrap_or(60),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_feed_parses_case_insensitively() {
        assert_eq!("IEX".parse::<DataFeed>().unwrap(), DataFeed::Iex);
        assert_eq!("sip".parse::<DataFeed>().unwrap(), DataFeed::Sip);
    }

    #[test]
    fn data_feed_rejects_unknown_value() {
        assert!("nasdaq".parse::<DataFeed>().is_err());
    }
}
