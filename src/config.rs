//! Server configuration module
//! Handles dynamic configuration parameters for the relay server

use crate::constants::{
    DEFAULT_BLACKLIST_URL, DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_KEEP_ALIVE_MS,
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_MIN_CLIENT_VERSION, DEFAULT_PORT, DEFAULT_SPAM_LIMIT,
    DEFAULT_SPAM_WINDOW_MS, DEFAULT_WRITE_BUFFER_SIZE,
};
use crate::error::{Result, RustyRelayError};
use std::env;
use std::time::Duration;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Packets allowed per spam window before a connection is treated as abusive
    pub spam_limit: i64,
    pub spam_window: Duration,
    /// Largest accepted frame payload, in bytes
    pub max_frame_size: usize,
    /// Bytes a connection may have waiting to be written before it is closed
    pub write_buffer_size: usize,
    /// Connections silent for longer than this are closed with a timeout
    pub idle_timeout: Duration,
    pub keep_alive_interval: Duration,
    /// Feed used to populate the blacklist; `None` disables refreshing
    pub blacklist_url: Option<String>,
    pub refresh_blacklist_on_start: bool,
    /// Addresses or networks banned at startup
    pub banned_ips: Vec<String>,
    /// Clients older than this build get an advisory; `None` disables the inspection
    pub min_client_version: Option<i32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            spam_limit: DEFAULT_SPAM_LIMIT,
            spam_window: Duration::from_millis(DEFAULT_SPAM_WINDOW_MS),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            keep_alive_interval: Duration::from_millis(DEFAULT_KEEP_ALIVE_MS),
            blacklist_url: Some(DEFAULT_BLACKLIST_URL.to_string()),
            refresh_blacklist_on_start: true,
            banned_ips: Vec::new(),
            min_client_version: Some(DEFAULT_MIN_CLIENT_VERSION),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| {
            RustyRelayError::ConfigError(format!("{} has an invalid value: {}", name, value))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("RUSTY_RELAY_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = parse_var("RUSTY_RELAY_PORT", DEFAULT_PORT)?;
        let spam_limit = parse_var("RUSTY_RELAY_SPAM_LIMIT", DEFAULT_SPAM_LIMIT)?;
        let spam_window_ms = parse_var("RUSTY_RELAY_SPAM_WINDOW_MS", DEFAULT_SPAM_WINDOW_MS)?;
        let max_frame_size = parse_var("RUSTY_RELAY_MAX_FRAME", DEFAULT_MAX_FRAME_SIZE)?;
        let write_buffer_size =
            parse_var("RUSTY_RELAY_WRITE_BUFFER", DEFAULT_WRITE_BUFFER_SIZE)?;
        let idle_timeout_ms = parse_var("RUSTY_RELAY_IDLE_TIMEOUT_MS", DEFAULT_IDLE_TIMEOUT_MS)?;
        let keep_alive_ms = parse_var("RUSTY_RELAY_KEEP_ALIVE_MS", DEFAULT_KEEP_ALIVE_MS)?;

        // An empty URL turns the feed off
        let blacklist_url = match env::var("RUSTY_RELAY_BLACKLIST_URL") {
            Ok(url) if url.trim().is_empty() => None,
            Ok(url) => Some(url.trim().to_string()),
            Err(_) => Some(DEFAULT_BLACKLIST_URL.to_string()),
        };

        let refresh_blacklist_on_start = parse_flag("RUSTY_RELAY_REFRESH_ON_START", true);

        let banned_ips = env::var("RUSTY_RELAY_BANNED_IPS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let min_client_version = match env::var("RUSTY_RELAY_MIN_CLIENT_VERSION") {
            Ok(v) if v.eq_ignore_ascii_case("off") => None,
            Ok(v) => Some(v.trim().parse().map_err(|_| {
                RustyRelayError::ConfigError(format!(
                    "RUSTY_RELAY_MIN_CLIENT_VERSION has an invalid value: {}",
                    v
                ))
            })?),
            Err(_) => Some(DEFAULT_MIN_CLIENT_VERSION),
        };

        let config = Self {
            host,
            port,
            spam_limit,
            spam_window: Duration::from_millis(spam_window_ms),
            max_frame_size,
            write_buffer_size,
            idle_timeout: Duration::from_millis(idle_timeout_ms),
            keep_alive_interval: Duration::from_millis(keep_alive_ms),
            blacklist_url,
            refresh_blacklist_on_start,
            banned_ips,
            min_client_version,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the transport cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.spam_limit <= 0 {
            return Err(RustyRelayError::ConfigError(
                "spam limit must be positive".to_string(),
            ));
        }
        if self.spam_window.is_zero() {
            return Err(RustyRelayError::ConfigError(
                "spam window must be longer than zero".to_string(),
            ));
        }
        if self.max_frame_size == 0 || self.max_frame_size > u16::MAX as usize {
            return Err(RustyRelayError::ConfigError(format!(
                "max frame size must be between 1 and {} bytes",
                u16::MAX
            )));
        }
        // a relayed frame of the largest size must fit in the write buffer
        if self.write_buffer_size < self.max_frame_size + 2 {
            return Err(RustyRelayError::ConfigError(format!(
                "write buffer must hold at least one {} byte frame",
                self.max_frame_size
            )));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(RustyRelayError::ConfigError(
                "keep-alive interval must be longer than zero".to_string(),
            ));
        }
        if self.keep_alive_interval >= self.idle_timeout {
            return Err(RustyRelayError::ConfigError(
                "keep-alive interval must be shorter than the idle timeout".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.spam_limit, 500);
        assert_eq!(config.spam_window, Duration::from_millis(3000));
        assert_eq!(config.min_client_version, Some(DEFAULT_MIN_CLIENT_VERSION));
    }

    #[test]
    fn test_validate_rejects_oversized_frames() {
        let config = ServerConfig {
            max_frame_size: 70_000,
            ..ServerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max frame size"));
    }

    #[test]
    fn test_validate_rejects_write_buffer_below_frame_size() {
        let config = ServerConfig {
            write_buffer_size: 4096,
            ..ServerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("write buffer"));
        assert_eq!(ServerConfig::default().write_buffer_size, 32_768);
    }

    #[test]
    fn test_validate_rejects_keep_alive_after_timeout() {
        let config = ServerConfig {
            keep_alive_interval: Duration::from_secs(20),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_spam_limit() {
        let config = ServerConfig {
            spam_limit: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
