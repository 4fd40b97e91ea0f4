//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A `.env` file in the working directory
//! - Direct environment variables (`FANOUT_HOST`, `FANOUT_PORT`, `JWT_SECRET`, `REDIS_URL`)
//! - TOML configuration file
//! - Nested environment overrides (`FANOUT__SESSION__QUEUE_CAPACITY=512`)

use anyhow::{bail, Context, Result};
use fanout_core::Resubscribe;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Value of `redis.url` that selects the in-process store and disables the bus.
pub const MEMORY_STORE_URL: &str = "memory";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Backing store and event bus.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Token verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-connection settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Hub settings.
    #[serde(default)]
    pub hub: HubSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Health endpoint.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL, or `memory` for the in-process store.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Pub/sub channel carrying domain events.
    #[serde(default = "default_events_channel")]
    pub events_channel: String,

    /// First delay before resubscribing after the event stream drops.
    #[serde(default = "default_resubscribe_min_delay")]
    pub resubscribe_min_delay_ms: u64,

    /// Upper bound on the resubscription delay.
    #[serde(default = "default_resubscribe_max_delay")]
    pub resubscribe_max_delay_ms: u64,
}

/// Authentication configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 shared secret.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Clock skew tolerated on `exp`, in seconds.
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// Connection session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Liveness probe interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// How long to wait for a pong before dropping the connection.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Frames buffered per connection before it is evicted.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Pending hub operations before callers wait.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// How often hub gauges are sampled, in milliseconds.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
}

/// Health check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Deadline for the store ping, in milliseconds.
    #[serde(default = "default_health_timeout")]
    pub timeout_ms: u64,
}

// Default value functions
fn default_host() -> String {
    std::env::var("FANOUT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    std::env::var("FANOUT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3002)
}

fn default_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn default_events_channel() -> String {
    "tickethacker:events".to_string()
}

fn default_resubscribe_min_delay() -> u64 {
    500
}

fn default_resubscribe_max_delay() -> u64 {
    30_000
}

fn default_jwt_secret() -> String {
    std::env::var("JWT_SECRET").unwrap_or_default()
}

fn default_leeway() -> u64 {
    0
}

fn default_true() -> bool {
    true
}

fn default_ping_interval() -> u64 {
    20_000 // 20 seconds
}

fn default_pong_wait() -> u64 {
    30_000 // 30 seconds
}

fn default_max_message_size() -> usize {
    4096
}

fn default_queue_capacity() -> usize {
    256
}

fn default_inbox_capacity() -> usize {
    4096
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_sample_interval() -> u64 {
    5_000
}

fn default_health_timeout() -> u64 {
    2_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            redis: RedisConfig::default(),
            auth: AuthConfig::default(),
            session: SessionConfig::default(),
            hub: HubSection::default(),
            metrics: MetricsConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            events_channel: default_events_channel(),
            resubscribe_min_delay_ms: default_resubscribe_min_delay(),
            resubscribe_max_delay_ms: default_resubscribe_max_delay(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            leeway_secs: default_leeway(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            pong_wait_ms: default_pong_wait(),
            max_message_size: default_max_message_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            sample_interval_ms: default_sample_interval(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_health_timeout(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    #[must_use]
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }
}

impl RedisConfig {
    /// Whether the in-process store was requested.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_STORE_URL
    }

    #[must_use]
    pub fn resubscribe(&self) -> Resubscribe {
        Resubscribe {
            min_delay: Duration::from_millis(self.resubscribe_min_delay_ms),
            max_delay: Duration::from_millis(self.resubscribe_max_delay_ms),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// the result fails validation.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "fanout.toml",
            "/etc/fanout/fanout.toml",
            "~/.config/fanout/fanout.toml",
        ];

        let found = config_paths
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        Self::layered(found.as_deref().map(Path::new))
    }

    /// Load configuration from a specific file plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// result fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::layered(Some(path.as_ref()))
    }

    fn layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FANOUT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let source = match path {
            Some(path) => format!("config file {}", path.display()),
            None => "environment".to_string(),
        };

        let config: Config = builder
            .build()
            .and_then(|built| built.try_deserialize())
            .with_context(|| format!("Failed to load configuration from {}", source))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            bail!("JWT secret is not set (auth.jwt_secret or JWT_SECRET)");
        }
        if self.session.max_message_size == 0 {
            bail!("session.max_message_size must be positive");
        }
        if self.session.queue_capacity == 0 {
            bail!("session.queue_capacity must be positive");
        }
        if self.session.ping_interval_ms >= self.session.pong_wait_ms {
            bail!(
                "session.ping_interval_ms ({}) must be shorter than session.pong_wait_ms ({})",
                self.session.ping_interval_ms,
                self.session.pong_wait_ms
            );
        }
        if self.redis.resubscribe_min_delay_ms == 0
            || self.redis.resubscribe_min_delay_ms > self.redis.resubscribe_max_delay_ms
        {
            bail!("redis.resubscribe_min_delay_ms must be in 1..=resubscribe_max_delay_ms");
        }
        if self.hub.inbox_capacity == 0 {
            bail!("hub.inbox_capacity must be positive");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health.timeout_ms)
    }
}
