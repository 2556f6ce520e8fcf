//! In-memory stream store for testing and development.
//!
//! Streams, groups and pending entries are lost when the process exits.
//! Failures can be injected to exercise retry paths without a Redis server.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::store::{StreamData, StreamEntry, StreamStore};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct MemoryGroup {
    /// Index of the first entry not yet delivered to the group.
    next_index: usize,
    /// Delivered but unacknowledged IDs, in delivery order.
    pending: Vec<String>,
    /// Acknowledged IDs, in acknowledgment order.
    acked: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryStream {
    entries: Vec<StreamEntry>,
    last_id: (u64, u64),
    groups: HashMap<String, MemoryGroup>,
}

impl MemoryStream {
    fn next_id(&mut self) -> String {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        self.last_id = if now_ms > self.last_id.0 {
            (now_ms, 0)
        } else {
            (self.last_id.0, self.last_id.1 + 1)
        };
        format!("{}-{}", self.last_id.0, self.last_id.1)
    }

    /// Index of the first entry after `start_id`.
    fn start_index(&self, start_id: &str) -> Result<usize> {
        match start_id {
            "$" => Ok(self.entries.len()),
            "0" | "0-0" => Ok(0),
            _ => {
                let start = parse_id(start_id).ok_or_else(|| {
                    Error::InvalidInput(format!("invalid stream ID '{}'", start_id))
                })?;
                Ok(self
                    .entries
                    .iter()
                    .take_while(|e| parse_id(&e.id).is_some_and(|id| id <= start))
                    .count())
            },
        }
    }
}

/// Parse an entry ID of the form `<ms>-<seq>` (a bare `<ms>` means sequence 0).
fn parse_id(id: &str) -> Option<(u64, u64)> {
    match id.split_once('-') {
        Some((ms, seq)) => Some((ms.parse().ok()?, seq.parse().ok()?)),
        None => Some((id.parse().ok()?, 0)),
    }
}

fn injected(op: &str) -> Error {
    Error::Connection(redis::RedisError::from(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        format!("injected {} failure", op),
    )))
}

/// Take one unit from a fault-injection counter, returning whether one was available.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory [`StreamStore`] with Redis consumer group semantics.
#[derive(Debug, Default)]
pub struct MemoryStreamStore {
    data: RwLock<HashMap<String, MemoryStream>>,
    appended: Notify,
    read_calls: AtomicUsize,
    fail_creates: AtomicUsize,
    fail_reads: AtomicUsize,
    fail_acks: AtomicUsize,
}

impl MemoryStreamStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry to `stream`, creating the stream if needed. Returns the new ID.
    pub fn add<I, K, V>(&self, stream: &str, fields: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let id = {
            let mut data = self
                .data
                .write()
                .map_err(|e| Error::Runtime(format!("Failed to acquire write lock: {}", e)))?;
            let s = data.entry(stream.to_string()).or_default();
            let id = s.next_id();
            s.entries.push(StreamEntry {
                id: id.clone(),
                fields: fields
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            });
            id
        };

        self.appended.notify_waiters();
        Ok(id)
    }

    /// IDs acknowledged for `group` on `stream`, in acknowledgment order.
    pub fn acked_ids(&self, stream: &str, group: &str) -> Result<Vec<String>> {
        self.with_group(stream, group, |g| g.acked.clone())
    }

    /// IDs delivered to `group` on `stream` but not yet acknowledged.
    pub fn pending_ids(&self, stream: &str, group: &str) -> Result<Vec<String>> {
        self.with_group(stream, group, |g| g.pending.clone())
    }

    /// Number of `read_group` calls made so far, failed ones included.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::Acquire)
    }

    /// Make the next `n` calls to `create_group` fail.
    pub fn fail_next_group_creates(&self, n: usize) {
        self.fail_creates.store(n, Ordering::Release);
    }

    /// Make the next `n` calls to `read_group` fail.
    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::Release);
    }

    /// Make the next `n` calls to `ack` fail.
    pub fn fail_next_acks(&self, n: usize) {
        self.fail_acks.store(n, Ordering::Release);
    }

    fn with_group<T>(&self, stream: &str, group: &str, f: impl FnOnce(&MemoryGroup) -> T) -> Result<T> {
        let data = self
            .data
            .read()
            .map_err(|e| Error::Runtime(format!("Failed to acquire read lock: {}", e)))?;
        data.get(stream)
            .and_then(|s| s.groups.get(group))
            .map(f)
            .ok_or_else(|| Error::GroupNotFound {
                stream: stream.to_string(),
                group: group.to_string(),
            })
    }

    /// Deliver up to `count` new entries per stream to `group`.
    fn deliver(&self, group: &str, streams: &[String], count: usize) -> Result<Vec<StreamData>> {
        let mut data = self
            .data
            .write()
            .map_err(|e| Error::Runtime(format!("Failed to acquire write lock: {}", e)))?;

        // Validate every stream before delivering anything.
        for stream in streams {
            if !data.get(stream).is_some_and(|s| s.groups.contains_key(group)) {
                return Err(Error::GroupNotFound {
                    stream: stream.clone(),
                    group: group.to_string(),
                });
            }
        }

        let mut result = Vec::new();
        for stream in streams {
            let Some(s) = data.get_mut(stream) else {
                continue;
            };
            let Some(g) = s.groups.get_mut(group) else {
                continue;
            };

            let end = g.next_index.saturating_add(count).min(s.entries.len());
            if end == g.next_index {
                continue;
            }

            let entries = s.entries[g.next_index..end].to_vec();
            g.next_index = end;
            g.pending.extend(entries.iter().map(|e| e.id.clone()));
            result.push(StreamData {
                key: stream.clone(),
                entries,
            });
        }

        Ok(result)
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn create_group(&self, stream: &str, group: &str, start_id: &str) -> Result<bool> {
        if take(&self.fail_creates) {
            return Err(injected("XGROUP CREATE"));
        }

        let mut data = self
            .data
            .write()
            .map_err(|e| Error::Runtime(format!("Failed to acquire write lock: {}", e)))?;
        let s = data.entry(stream.to_string()).or_default();
        if s.groups.contains_key(group) {
            return Ok(false);
        }

        let next_index = s.start_index(start_id)?;
        s.groups.insert(
            group.to_string(),
            MemoryGroup {
                next_index,
                ..MemoryGroup::default()
            },
        );
        Ok(true)
    }

    async fn read_group(
        &self,
        group: &str,
        _consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamData>> {
        self.read_calls.fetch_add(1, Ordering::AcqRel);
        if take(&self.fail_reads) {
            return Err(injected("XREADGROUP"));
        }

        let deadline = Instant::now() + block;
        loop {
            // Register interest before looking so an append in between is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.deliver(group, streams, count)?;
            if !batch.is_empty() || block.is_zero() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        if take(&self.fail_acks) {
            return Err(injected("XACK"));
        }

        let mut data = self
            .data
            .write()
            .map_err(|e| Error::Runtime(format!("Failed to acquire write lock: {}", e)))?;
        let g = data
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| Error::GroupNotFound {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;

        // Like XACK, acknowledging an ID that is not pending is a no-op.
        if let Some(pos) = g.pending.iter().position(|p| p == id) {
            g.pending.remove(pos);
            g.acked.push(id.to_string());
        }
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        self.with_group(stream, group, |g| g.pending.len() as u64)
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool> {
        let mut data = self
            .data
            .write()
            .map_err(|e| Error::Runtime(format!("Failed to acquire write lock: {}", e)))?;
        Ok(data
            .get_mut(stream)
            .is_some_and(|s| s.groups.remove(group).is_some()))
    }
}
