//! Stream store abstraction.
//!
//! A [`StreamStore`] provides the consumer group primitives a reader needs:
//! group creation, blocking group reads and acknowledgment.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A single stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Store-assigned entry ID, e.g. `1700000000000-0`.
    pub id: String,
    /// Entry fields.
    pub fields: HashMap<String, String>,
}

/// Entries read from one stream, in store order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamData {
    /// Stream key.
    pub key: String,
    /// Entries in the order the store returned them.
    pub entries: Vec<StreamEntry>,
}

/// Consumer group operations on a stream store.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Create `group` on `stream` starting at `start_id`, creating the stream if needed.
    ///
    /// Returns `false` when the group already exists.
    async fn create_group(&self, stream: &str, group: &str, start_id: &str) -> Result<bool>;

    /// Read entries never delivered to `group` from every stream in `streams`.
    ///
    /// Reads at most `count` entries per stream and waits up to `block` when none
    /// are available (zero = return immediately). An empty result means no data.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamData>>;

    /// Acknowledge entry `id` of `stream` for `group`.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()>;

    /// Number of delivered but unacknowledged entries of `stream` for `group`.
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64>;

    /// Destroy `group` on `stream`. Returns `false` if it did not exist.
    async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool>;
}
