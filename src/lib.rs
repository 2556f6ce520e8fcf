//! # redis-group-consumer
//!
//! Competing-consumer reader for Redis Streams.
//!
//! A [`ConsumerGroupReader`] joins a consumer group on one or more streams,
//! pulls entries that were never delivered to the group, hands each one to a
//! [`Delegate`] and acknowledges (XACK) the entries the delegate accepted.
//! Rejected entries stay pending in the group for later redelivery.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use redis_group_consumer::{ConsumerGroupReader, DelegateFn, ReaderConfig, RedisStreamStore};
//!
//! # async fn run() -> redis_group_consumer::Result<()> {
//! let store = Arc::new(RedisStreamStore::connect("redis://localhost:6379").await?);
//! let delegate = Arc::new(DelegateFn::new(|stream, id, fields| async move {
//!     println!("{} {} {:?}", stream, id, fields);
//!     Ok(())
//! }));
//!
//! let config = ReaderConfig::new("audit")
//!     .with_stream_names(["orders"])
//!     .with_block_time(Duration::from_secs(1))
//!     .with_handle_time(Duration::from_secs(10));
//!
//! let mut reader = ConsumerGroupReader::new(store, delegate, config)?;
//! reader.start().await?;
//! // ... until shutdown
//! reader.stop(Duration::from_secs(15)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Handling
//!
//! | Failure | Outcome |
//! |---------|---------|
//! | Group creation (other than BUSYGROUP) | `start()` returns the error |
//! | Read | Logged, retried after backoff |
//! | Delegate | Logged, entry left pending, batch continues |
//! | Acknowledgment | Logged, retried after backoff |
//! | Iteration deadline | Logged, retried after backoff |
//!
//! Retries continue indefinitely unless
//! [`ReaderConfig::with_max_consecutive_failures`] sets a limit.
//!
//! ## Logging
//!
//! Events are emitted through [`tracing`]; installing a subscriber is up to the
//! application.

// Module organization:
// - stream/    : consumer group reader and stream stores
// - (top-level): shared infrastructure (connection, error, config, backoff, delegate)

mod backoff;
mod config;
mod connection;
mod delegate;
mod error;
pub mod stream;

pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use config::ReaderConfig;
pub use connection::{ConnectionOptions, DEFAULT_ENV_PREFIX, DEFAULT_REDIS_URL, RedisConnection};
pub use delegate::{Delegate, DelegateFn};
pub use error::{Error, HandlerError, Result};
pub use stream::{
    ConsumerGroupReader, MemoryStreamStore, ReaderState, ReaderStats, RedisStreamStore,
    StreamData, StreamEntry, StreamStore,
};
