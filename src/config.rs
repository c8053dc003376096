use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the push server. Set via ESTATE_API_URL.
    /// Default: http://localhost:5000.
    pub api_url: String,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            connection: ConnectionConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_api_url(DEFAULT_API_URL)
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let api_url = std::env::var("ESTATE_API_URL")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.into());

    url::Url::parse(&api_url)
        .map_err(|e| anyhow::anyhow!("ESTATE_API_URL '{}' is not a valid URL: {}", api_url, e))?;

    Ok(Config::with_api_url(api_url))
}

/// Connection lifecycle tunables.
///
/// Reconnection is linear: attempt `n` waits `n * reconnect_delay`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Capacity of the inbound and outbound frame channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Pause between long-poll requests when the polling transport is used.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_channel_capacity() -> usize {
    256
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            channel_capacity: default_channel_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay before reconnection attempt `attempt` (1-based).
    #[must_use]
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.saturating_mul(u64::from(attempt)))
    }

    /// Whether another attempt may follow `attempts_made` failed ones.
    #[must_use]
    pub fn should_reconnect(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_reconnect_attempts
    }
}

#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    connect_timeout_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
    channel_capacity: Option<usize>,
    poll_interval_ms: Option<u64>,
}

impl ConnectionConfigBuilder {
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    #[must_use]
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity.max(1));
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    #[must_use]
    pub fn build(self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout_ms: self
                .connect_timeout_ms
                .unwrap_or_else(default_connect_timeout_ms),
            max_reconnect_attempts: self
                .max_reconnect_attempts
                .unwrap_or_else(default_max_reconnect_attempts),
            reconnect_delay_ms: self
                .reconnect_delay_ms
                .unwrap_or_else(default_reconnect_delay_ms),
            channel_capacity: self
                .channel_capacity
                .unwrap_or_else(default_channel_capacity),
            poll_interval_ms: self.poll_interval_ms.unwrap_or_else(default_poll_interval_ms),
        }
    }
}

/// Notification store tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// How long a non-reminder notification stays in the list after receipt.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_retention_secs() -> u64 {
    60 * 60
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(20));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay_ms, 1_000);
    }

    #[test]
    fn test_linear_backoff() {
        let config = ConnectionConfig::default();
        let delays: Vec<_> = (1..=5).map(|n| config.reconnect_delay(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(4),
                Duration::from_secs(5),
            ]
        );
    }

    #[test]
    fn test_should_reconnect_stops_at_max() {
        let config = ConnectionConfig::builder().max_reconnect_attempts(3).build();
        assert!(config.should_reconnect(0));
        assert!(config.should_reconnect(2));
        assert!(!config.should_reconnect(3));
    }

    #[test]
    fn test_builder_overrides() {
        let config = ConnectionConfig::builder()
            .connect_timeout(Duration::from_secs(5))
            .reconnect_delay(Duration::from_millis(10))
            .channel_capacity(0)
            .build();
        assert_eq!(config.connect_timeout_ms, 5_000);
        assert_eq!(config.reconnect_delay(3), Duration::from_millis(30));
        assert_eq!(config.channel_capacity, 1);
    }

    #[test]
    fn test_store_retention_is_one_hour() {
        assert_eq!(StoreConfig::default().retention(), Duration::from_secs(3600));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: Config = serde_json::from_str(r#"{"api_url":"http://push.local"}"#).unwrap();
        assert_eq!(config.api_url, "http://push.local");
        assert_eq!(config.connection.max_reconnect_attempts, 5);
        assert_eq!(config.store.retention_secs, 3600);
    }
}
