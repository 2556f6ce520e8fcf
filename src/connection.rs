//! Redis connection management.
//!
//! Besides the URL, the client can be tuned from prefixed environment
//! variables:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `<prefix>MAX_RETRIES` | Reconnect attempts per failed connection |
//! | `<prefix>MIN_RETRY_BACKOFF` | First reconnect delay |
//! | `<prefix>MAX_RETRY_BACKOFF` | Ceiling for the reconnect delay |
//! | `<prefix>DIAL_TIMEOUT` | Timeout for establishing a connection |
//! | `<prefix>READ_TIMEOUT` | Timeout for a command response |
//! | `<prefix>WRITE_TIMEOUT` | Timeout for sending a command |
//!
//! The connection manager has a single response timeout covering both
//! directions, so the larger of the read and write timeouts is used. It must
//! be larger than the reader's block time, or every idle `XREADGROUP` fails
//! with a timeout.

use std::time::Duration;

use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};

use crate::config::{parse_duration, parse_number};
use crate::error::{Error, Result};

/// Redis URL used when none is configured.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Environment prefix commonly used for Redis settings.
pub const DEFAULT_ENV_PREFIX: &str = "REDIS_";

/// Client tuning options. `None` keeps the redis client default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Reconnect attempts before a command fails.
    pub max_retries: Option<usize>,
    /// Delay before the first reconnect attempt.
    pub min_retry_backoff: Option<Duration>,
    /// Upper bound on the reconnect delay.
    pub max_retry_backoff: Option<Duration>,
    /// Timeout for establishing a connection.
    pub dial_timeout: Option<Duration>,
    /// Timeout for reading a response.
    pub read_timeout: Option<Duration>,
    /// Timeout for writing a command.
    pub write_timeout: Option<Duration>,
}

impl ConnectionOptions {
    /// Read the tuning variables named `<prefix><VARIABLE>` through `lookup`.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{}{}", prefix, name);
            lookup(&key).map(|value| (key, value))
        };
        let duration = |name: &str| -> Result<Option<Duration>> {
            var(name)
                .map(|(key, value)| parse_duration(&key, &value))
                .transpose()
        };

        Ok(Self {
            max_retries: var("MAX_RETRIES")
                .map(|(key, value)| parse_number(&key, &value))
                .transpose()?,
            min_retry_backoff: duration("MIN_RETRY_BACKOFF")?,
            max_retry_backoff: duration("MAX_RETRY_BACKOFF")?,
            dial_timeout: duration("DIAL_TIMEOUT")?,
            read_timeout: duration("READ_TIMEOUT")?,
            write_timeout: duration("WRITE_TIMEOUT")?,
        })
    }

    /// Response timeout for the connection manager: the larger of the read
    /// and write timeouts.
    pub fn response_timeout(&self) -> Option<Duration> {
        match (self.read_timeout, self.write_timeout) {
            (Some(read), Some(write)) => Some(read.max(write)),
            (read, write) => read.or(write),
        }
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        let mut config = ConnectionManagerConfig::new();
        if let Some(retries) = self.max_retries {
            config = config.set_number_of_retries(retries);
        }
        if let Some(min) = self.min_retry_backoff {
            config = config.set_factor((min.as_millis() as u64).max(1));
        }
        if let Some(max) = self.max_retry_backoff {
            config = config.set_max_delay(max.as_millis() as u64);
        }
        if let Some(dial) = self.dial_timeout {
            config = config.set_connection_timeout(dial);
        }
        if let Some(response) = self.response_timeout() {
            config = config.set_response_timeout(response);
        }
        config
    }
}

/// Redis connection wrapper that manages connection lifecycle.
pub struct RedisConnection {
    client: Client,
    options: ConnectionOptions,
}

impl RedisConnection {
    /// Create a new Redis connection from a URL.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Examples
    /// ```ignore
    /// let conn = RedisConnection::new("redis://localhost:6379")?;
    /// ```
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
        Ok(Self {
            client,
            options: ConnectionOptions::default(),
        })
    }

    /// Apply client tuning options.
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Create a connection from the `<prefix>URL` environment variable and
    /// the tuning variables listed in the module docs.
    ///
    /// Falls back to [`DEFAULT_REDIS_URL`] when the URL is not set.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(&format!("{}URL", prefix)).unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
        let options = ConnectionOptions::from_lookup(prefix, &lookup)?;
        Ok(Self::new(&url)?.with_options(options))
    }

    /// Client tuning options in effect.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Get a ConnectionManager for async operations with auto-reconnection.
    ///
    /// ConnectionManager is cheap to clone and reconnects on failure. Blocking
    /// reads hold the underlying connection, so give each reader its own manager.
    pub async fn get_connection_manager(&self) -> Result<ConnectionManager> {
        ConnectionManager::new_with_config(self.client.clone(), self.options.manager_config())
            .await
            .map_err(Error::Connection)
    }

    /// Host and port this connection points at.
    pub fn addr(&self) -> String {
        self.client.get_connection_info().addr.to_string()
    }
}
