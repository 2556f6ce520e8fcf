//! Reader configuration.
//!
//! A [`ReaderConfig`] is built either with the `with_*` builder methods or
//! from prefixed environment variables:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `STREAM_NAMES` | `stream_names` (comma separated) | none |
//! | `GROUP_NAME` | `group` | none |
//! | `CONSUMER_NAME` | `consumer` | `consumer-<pid>` |
//! | `STREAM_START` | `group_start_id` | `0` |
//! | `BLOCK_TIME` | `block_time` | `1s` |
//! | `READ_PER_BLOCK` | `read_count` | `2` |
//! | `HANDLE_TIME` | `handle_time` | `10s` |
//! | `MAX_CONSECUTIVE_FAILURES` | `max_consecutive_failures` | unbounded |

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for a [`ConsumerGroupReader`](crate::ConsumerGroupReader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Streams read by the group. All of them are read in a single call.
    pub stream_names: Vec<String>,
    /// Consumer group name.
    pub group: String,
    /// Consumer name within the group.
    pub consumer: String,
    /// Start ID when creating a new group ("0" = from beginning, "$" = from now).
    pub group_start_id: String,
    /// How long each read blocks waiting for new entries (zero = non-blocking).
    pub block_time: Duration,
    /// Maximum entries fetched per stream per read.
    pub read_count: usize,
    /// Budget for one full read, dispatch and acknowledge iteration.
    pub handle_time: Duration,
    /// Give up after this many failed iterations in a row. `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            stream_names: Vec::new(),
            group: String::new(),
            consumer: format!("consumer-{}", std::process::id()),
            group_start_id: "0".to_string(),
            block_time: Duration::from_secs(1),
            read_count: 2,
            handle_time: Duration::from_secs(10),
            max_consecutive_failures: None,
        }
    }
}

impl ReaderConfig {
    /// Create a configuration for `group` with default settings.
    pub fn new(group: &str) -> Self {
        Self {
            group: group.to_string(),
            ..Self::default()
        }
    }

    /// Set the streams to read from.
    pub fn with_stream_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the consumer name within the group.
    pub fn with_consumer(mut self, consumer: &str) -> Self {
        self.consumer = consumer.to_string();
        self
    }

    /// Set the start ID for new groups.
    pub fn with_group_start_id(mut self, id: &str) -> Self {
        self.group_start_id = id.to_string();
        self
    }

    /// Set how long each read blocks.
    pub fn with_block_time(mut self, block_time: Duration) -> Self {
        self.block_time = block_time;
        self
    }

    /// Set the maximum number of entries read per stream per call.
    pub fn with_read_count(mut self, count: usize) -> Self {
        self.read_count = count;
        self
    }

    /// Set the deadline for one iteration, block time included.
    pub fn with_handle_time(mut self, handle_time: Duration) -> Self {
        self.handle_time = handle_time;
        self
    }

    /// Stop retrying after `limit` consecutive failed iterations.
    pub fn with_max_consecutive_failures(mut self, limit: u32) -> Self {
        self.max_consecutive_failures = Some(limit);
        self
    }

    /// Build a configuration from environment variables named `<prefix><VARIABLE>`.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{}{}", prefix, name);
            lookup(&key).map(|value| (key, value))
        };

        let mut config = Self::default();

        if let Some((_, value)) = var("STREAM_NAMES") {
            config.stream_names = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some((_, value)) = var("GROUP_NAME") {
            config.group = value;
        }
        if let Some((_, value)) = var("CONSUMER_NAME") {
            config.consumer = value;
        }
        if let Some((_, value)) = var("STREAM_START") {
            config.group_start_id = value;
        }
        if let Some((key, value)) = var("BLOCK_TIME") {
            config.block_time = parse_duration(&key, &value)?;
        }
        if let Some((key, value)) = var("READ_PER_BLOCK") {
            config.read_count = parse_number(&key, &value)?;
        }
        if let Some((key, value)) = var("HANDLE_TIME") {
            config.handle_time = parse_duration(&key, &value)?;
        }
        if let Some((key, value)) = var("MAX_CONSECUTIVE_FAILURES") {
            config.max_consecutive_failures = Some(parse_number(&key, &value)?);
        }

        Ok(config)
    }

    /// Check that the settings required to run a reader are present.
    pub fn validate(&self) -> Result<()> {
        if self.stream_names.is_empty() {
            return Err(Error::InvalidInput(
                "at least one stream name is required".to_string(),
            ));
        }
        if let Some(name) = self.stream_names.iter().find(|s| s.is_empty()) {
            return Err(Error::InvalidInput(format!(
                "stream name must not be empty: {:?}",
                name
            )));
        }
        if self.group.is_empty() {
            return Err(Error::InvalidInput("group name must not be empty".to_string()));
        }
        if self.consumer.is_empty() {
            return Err(Error::InvalidInput(
                "consumer name must not be empty".to_string(),
            ));
        }
        if self.read_count == 0 {
            return Err(Error::InvalidInput(
                "read count must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| Error::invalid_config(key, value, e))
}

pub(crate) fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::invalid_config(key, value, e))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::new("foo");
        assert_eq!(config.group, "foo");
        assert_eq!(config.block_time, Duration::from_secs(1));
        assert_eq!(config.read_count, 2);
        assert_eq!(config.handle_time, Duration::from_secs(10));
        assert_eq!(config.group_start_id, "0");
        assert!(config.consumer.starts_with("consumer-"));
        assert!(config.max_consecutive_failures.is_none());
    }

    #[test]
    fn test_builder() {
        let config = ReaderConfig::new("g")
            .with_stream_names(["foo", "bar"])
            .with_consumer("worker-1")
            .with_group_start_id("100")
            .with_block_time(Duration::from_millis(250))
            .with_read_count(4)
            .with_handle_time(Duration::from_secs(40))
            .with_max_consecutive_failures(7);

        assert_eq!(config.stream_names, vec!["foo".to_string(), "bar".to_string()]);
        assert_eq!(config.consumer, "worker-1");
        assert_eq!(config.group_start_id, "100");
        assert_eq!(config.block_time, Duration::from_millis(250));
        assert_eq!(config.read_count, 4);
        assert_eq!(config.handle_time, Duration::from_secs(40));
        assert_eq!(config.max_consecutive_failures, Some(7));
    }

    #[test]
    fn test_from_lookup_with_prefix() {
        let env = vars(&[
            ("C1_GROUP_NAME", "group1"),
            ("C1_STREAM_NAMES", "test_stream1, test_stream2"),
            ("C1_BLOCK_TIME", "2s"),
            ("C1_READ_PER_BLOCK", "10"),
            ("C1_HANDLE_TIME", "1m"),
            ("C1_CONSUMER_NAME", "worker-7"),
            ("C1_STREAM_START", "$"),
            ("C1_MAX_CONSECUTIVE_FAILURES", "12"),
            ("C2_GROUP_NAME", "group2"),
        ]);

        let c1 = ReaderConfig::from_lookup("C1_", |k| env.get(k).cloned()).unwrap();
        assert_eq!(c1.group, "group1");
        assert_eq!(
            c1.stream_names,
            vec!["test_stream1".to_string(), "test_stream2".to_string()]
        );
        assert_eq!(c1.block_time, Duration::from_secs(2));
        assert_eq!(c1.read_count, 10);
        assert_eq!(c1.handle_time, Duration::from_secs(60));
        assert_eq!(c1.consumer, "worker-7");
        assert_eq!(c1.group_start_id, "$");
        assert_eq!(c1.max_consecutive_failures, Some(12));

        let c2 = ReaderConfig::from_lookup("C2_", |k| env.get(k).cloned()).unwrap();
        assert_eq!(c2.group, "group2");
        assert!(c2.stream_names.is_empty());
        assert_eq!(c2.block_time, Duration::from_secs(1));
        assert_eq!(c2.consumer, ReaderConfig::default().consumer);
        assert_eq!(c2.group_start_id, "0");
        assert_eq!(c2.max_consecutive_failures, None);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let env = vars(&[("BLOCK_TIME", "soon")]);
        let err = ReaderConfig::from_lookup("", |k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == "BLOCK_TIME"));

        let env = vars(&[("READ_PER_BLOCK", "-1")]);
        assert!(ReaderConfig::from_lookup("", |k| env.get(k).cloned()).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ReaderConfig::new("g").validate().is_err());
        assert!(ReaderConfig::new("").with_stream_names(["s"]).validate().is_err());
        assert!(
            ReaderConfig::new("g")
                .with_stream_names(["s"])
                .with_read_count(0)
                .validate()
                .is_err()
        );
        assert!(ReaderConfig::new("g").with_stream_names(["s"]).validate().is_ok());
    }
}
