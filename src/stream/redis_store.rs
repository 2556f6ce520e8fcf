//! Redis-backed stream store.
//!
//! Uses XGROUP CREATE ... MKSTREAM, XREADGROUP, XACK and XPENDING over a
//! [`ConnectionManager`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::store::{StreamData, StreamEntry, StreamStore};
use crate::connection::RedisConnection;
use crate::error::{Error, Result};

// Type aliases for complex Redis response types
type XReadGroupResponse = Option<Vec<(String, Vec<(String, HashMap<String, String>)>)>>;
type XPendingResponse = (
    u64,
    Option<String>,
    Option<String>,
    Option<Vec<(String, u64)>>,
);

/// [`StreamStore`] backed by a Redis server.
#[derive(Clone)]
pub struct RedisStreamStore {
    conn: ConnectionManager,
}

impl RedisStreamStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let connection = RedisConnection::new(url)?;
        Self::from_connection(&connection).await
    }

    /// Open a dedicated connection manager from an existing connection.
    pub async fn from_connection(connection: &RedisConnection) -> Result<Self> {
        let conn = connection.get_connection_manager().await?;
        Ok(Self::from_connection_manager(conn))
    }

    /// Use an existing connection manager.
    ///
    /// Blocking reads occupy the connection for up to the block time, so the
    /// manager should not be shared with latency-sensitive callers.
    pub fn from_connection_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StreamStore for RedisStreamStore {
    async fn create_group(&self, stream: &str, group: &str, start_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(e) if Error::is_busy_group(&e) => Ok(false),
            Err(e) => Err(Error::Connection(e)),
        }
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamData>> {
        let mut conn = self.conn.clone();

        // XREADGROUP GROUP group consumer COUNT count [BLOCK ms] STREAMS s1 s2 ... > > ...
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
        if !block.is_zero() {
            // BLOCK 0 would wait forever; clamp sub-millisecond blocks up to 1ms.
            cmd.arg("BLOCK").arg(block.as_millis().max(1) as u64);
        }
        cmd.arg("STREAMS").arg(streams);
        for _ in streams {
            cmd.arg(">");
        }

        let result: XReadGroupResponse = cmd.query_async(&mut conn).await.map_err(|e| {
            if Error::is_no_group(&e) {
                Error::GroupNotFound {
                    stream: streams.join(","),
                    group: group.to_string(),
                }
            } else {
                Error::Connection(e)
            }
        })?;

        let data = result
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(key, entries)| StreamData {
                key,
                entries: entries
                    .into_iter()
                    .map(|(id, fields)| StreamEntry { id, fields })
                    .collect(),
            })
            .collect();

        Ok(data)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();

        redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query_async::<usize>(&mut conn)
            .await?;
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let mut conn = self.conn.clone();

        // XPENDING stream group
        let result: XPendingResponse = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await?;

        Ok(result.0)
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        let destroyed: i64 = redis::cmd("XGROUP")
            .arg("DESTROY")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await?;

        Ok(destroyed > 0)
    }
}
