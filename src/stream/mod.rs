//! Redis Stream consumer group support.
//!
//! This module provides the [`ConsumerGroupReader`], which consumes one or
//! more streams as a member of a consumer group, and the [`StreamStore`]
//! abstraction it reads through.
//!
//! ## Stores
//!
//! - [`RedisStreamStore`] - XGROUP / XREADGROUP / XACK against a Redis server
//! - [`MemoryStreamStore`] - in-process store for tests and development

mod memory;
mod reader;
mod redis_store;
mod store;

pub use memory::MemoryStreamStore;
pub use reader::{ConsumerGroupReader, ReaderState, ReaderStats};
pub use redis_store::RedisStreamStore;
pub use store::{StreamData, StreamEntry, StreamStore};
