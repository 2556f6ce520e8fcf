//! Consumer group reader.
//!
//! A [`ConsumerGroupReader`] pulls never-delivered entries from one or more
//! streams as a member of a consumer group, hands each entry to a
//! [`Delegate`] and acknowledges the ones the delegate accepted.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use redis_group_consumer::{ConsumerGroupReader, DelegateFn, ReaderConfig, RedisStreamStore};
//!
//! let store = Arc::new(RedisStreamStore::connect("redis://localhost:6379").await?);
//! let delegate = Arc::new(DelegateFn::new(|stream, id, fields| async move {
//!     println!("{} {} {:?}", stream, id, fields);
//!     Ok(())
//! }));
//! let config = ReaderConfig::new("audit").with_stream_names(["orders", "payments"]);
//!
//! let mut reader = ConsumerGroupReader::new(store, delegate, config)?;
//! reader.start().await?;
//! // ...
//! reader.stop(Duration::from_secs(15)).await?;
//! ```
//!
//! # Delivery
//!
//! Entries are handled one at a time in store order. An entry is acknowledged
//! right after its delegate call succeeds; a failed entry is left pending and
//! the rest of the batch is still handled. A failed read or acknowledgment
//! fails the whole iteration, which is retried after a backoff wait.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::store::StreamStore;
use crate::backoff::{BackoffPolicy, ExponentialBackoff};
use crate::config::ReaderConfig;
use crate::delegate::Delegate;
use crate::error::{Error, Result};

// ============================================================================
// Reader State and Statistics
// ============================================================================

/// Lifecycle of a [`ConsumerGroupReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Built but not started.
    Created,
    /// The background loop is running.
    Running,
    /// Stop was requested; the loop has not exited yet.
    Stopping,
    /// The loop has exited. The reader cannot be started again.
    Stopped,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReaderState::Created => "created",
            ReaderState::Running => "running",
            ReaderState::Stopping => "stopping",
            ReaderState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Statistics about a reader's consumption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Completed iterations, failed ones included.
    pub iterations: u64,
    /// Iterations that failed on read, acknowledgment or deadline.
    pub failed_iterations: u64,
    /// Entries handed to the delegate.
    pub messages_handled: u64,
    /// Entries acknowledged.
    pub messages_acked: u64,
    /// Entries the delegate rejected.
    pub handler_failures: u64,
    /// Last entry ID that was acknowledged.
    pub last_acked_id: Option<String>,
}

#[derive(Debug, Default)]
struct StatsCounters {
    iterations: AtomicU64,
    failed_iterations: AtomicU64,
    messages_handled: AtomicU64,
    messages_acked: AtomicU64,
    handler_failures: AtomicU64,
    last_acked_id: Mutex<Option<String>>,
}

impl StatsCounters {
    fn record_ack(&self, id: &str) {
        self.messages_acked.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_acked_id.lock() {
            *last = Some(id.to_string());
        }
    }

    fn snapshot(&self) -> ReaderStats {
        ReaderStats {
            iterations: self.iterations.load(Ordering::Relaxed),
            failed_iterations: self.failed_iterations.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            messages_acked: self.messages_acked.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            last_acked_id: self.last_acked_id.lock().ok().and_then(|last| last.clone()),
        }
    }
}

// ============================================================================
// Consumer Group Reader
// ============================================================================

/// Reads streams as a member of a consumer group on a background task.
pub struct ConsumerGroupReader<S, D> {
    store: Arc<S>,
    delegate: Arc<D>,
    config: Arc<ReaderConfig>,
    /// Taken by the loop when it starts.
    backoff: Option<Box<dyn BackoffPolicy>>,
    shutdown: CancellationToken,
    state: Arc<watch::Sender<ReaderState>>,
    stats: Arc<StatsCounters>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl<S, D> ConsumerGroupReader<S, D>
where
    S: StreamStore + 'static,
    D: Delegate + 'static,
{
    /// Create a reader. Fails if the configuration lacks streams, group or consumer name.
    pub fn new(store: Arc<S>, delegate: Arc<D>, config: ReaderConfig) -> Result<Self> {
        config.validate()?;

        if config.handle_time <= config.block_time {
            warn!(
                group = %config.group,
                handle_time_ms = config.handle_time.as_millis() as u64,
                block_time_ms = config.block_time.as_millis() as u64,
                "handle time does not exceed block time, idle reads will time out"
            );
        }

        let (state, _) = watch::channel(ReaderState::Created);
        Ok(Self {
            store,
            delegate,
            config: Arc::new(config),
            backoff: None,
            shutdown: CancellationToken::new(),
            state: Arc::new(state),
            stats: Arc::new(StatsCounters::default()),
            handle: None,
        })
    }

    /// Use `backoff` to pace retries instead of the default [`ExponentialBackoff`].
    pub fn with_backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Some(Box::new(backoff));
        self
    }

    /// Ensure the consumer group exists on every stream, then spawn the read loop.
    ///
    /// An existing group is not an error. Any other failure is returned and the
    /// loop is not spawned. Returns as soon as the loop is running.
    pub async fn start(&mut self) -> Result<()> {
        let state = self.state();
        if state != ReaderState::Created {
            return Err(Error::InvalidState {
                state,
                operation: "start",
            });
        }

        let group = &self.config.group;
        for stream in &self.config.stream_names {
            info!(group = %group, stream = %stream, "ensuring consumer group exists");

            match self
                .store
                .create_group(stream, group, &self.config.group_start_id)
                .await
            {
                Ok(true) => {
                    info!(group = %group, stream = %stream, "created consumer group");
                },
                Ok(false) => {
                    info!(group = %group, stream = %stream, "consumer group already exists, do nothing");
                },
                Err(e) => {
                    error!(group = %group, stream = %stream, error = %e, "failed to ensure consumer group exists");
                    return Err(e);
                },
            }
        }

        let backoff = self
            .backoff
            .take()
            .unwrap_or_else(|| Box::new(ExponentialBackoff::default()));
        let worker = Worker {
            store: Arc::clone(&self.store),
            delegate: Arc::clone(&self.delegate),
            config: Arc::clone(&self.config),
            shutdown: self.shutdown.clone(),
            stats: Arc::clone(&self.stats),
        };
        let span = info_span!(
            "consumer_group_reader",
            group = %self.config.group,
            consumer = %self.config.consumer
        );
        let state = Arc::clone(&self.state);

        self.state.send_replace(ReaderState::Running);
        self.handle = Some(tokio::spawn(
            async move {
                // Marks the reader stopped even if the loop panics.
                let _stopped = MarkStopped(state);
                worker.run(backoff).await
            }
            .instrument(span),
        ));

        Ok(())
    }

    /// Signal the loop to stop and wait up to `deadline` for it to exit.
    ///
    /// A backoff wait is interrupted immediately; an iteration in flight is
    /// allowed to finish. Returns [`Error::StopTimeout`] if the loop is still
    /// running at the deadline, in which case `stop` may be called again.
    /// Returns the loop's error if it had already given up retrying.
    pub async fn stop(&mut self, deadline: Duration) -> Result<()> {
        self.shutdown.cancel();

        if self.state() == ReaderState::Created {
            self.state.send_replace(ReaderState::Stopped);
            return Ok(());
        }

        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };

        self.state.send_if_modified(|state| {
            if *state == ReaderState::Running {
                *state = ReaderState::Stopping;
                true
            } else {
                false
            }
        });

        info!(group = %self.config.group, "waiting for consumer's message handling");
        match tokio::time::timeout(deadline, handle).await {
            Ok(joined) => {
                self.handle = None;
                self.state.send_replace(ReaderState::Stopped);
                joined.map_err(|e| Error::Runtime(format!("Reader task failed: {}", e)))?
            },
            Err(_) => {
                warn!(
                    group = %self.config.group,
                    deadline_ms = deadline.as_millis() as u64,
                    "reader did not stop before the deadline"
                );
                Err(Error::StopTimeout(deadline))
            },
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReaderState {
        *self.state.borrow()
    }

    /// Snapshot of the consumption statistics.
    pub fn stats(&self) -> ReaderStats {
        self.stats.snapshot()
    }

    /// The reader's configuration.
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }
}

impl<S, D> Drop for ConsumerGroupReader<S, D> {
    fn drop(&mut self) {
        // Let a detached loop wind down instead of reading forever.
        self.shutdown.cancel();
    }
}

// ============================================================================
// Read Loop
// ============================================================================

/// Sets the reader state to [`ReaderState::Stopped`] when dropped.
struct MarkStopped(Arc<watch::Sender<ReaderState>>);

impl Drop for MarkStopped {
    fn drop(&mut self) {
        self.0.send_replace(ReaderState::Stopped);
    }
}

/// State owned by the background loop.
struct Worker<S, D> {
    store: Arc<S>,
    delegate: Arc<D>,
    config: Arc<ReaderConfig>,
    shutdown: CancellationToken,
    stats: Arc<StatsCounters>,
}

impl<S, D> Worker<S, D>
where
    S: StreamStore,
    D: Delegate,
{
    async fn run(self, mut backoff: Box<dyn BackoffPolicy>) -> Result<()> {
        info!(streams = ?self.config.stream_names, "reader loop started");
        let mut consecutive_failures: u32 = 0;

        loop {
            let result =
                match tokio::time::timeout(self.config.handle_time, self.handle_next_batch()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::HandleTimeout(self.config.handle_time)),
                };
            self.stats.iterations.fetch_add(1, Ordering::Relaxed);

            let err = match result {
                Ok(()) => {
                    consecutive_failures = 0;
                    backoff.reset();
                    if self.shutdown.is_cancelled() {
                        info!("reader loop stopped");
                        return Ok(());
                    }
                    continue;
                },
                Err(err) => err,
            };

            self.stats.failed_iterations.fetch_add(1, Ordering::Relaxed);
            consecutive_failures = consecutive_failures.saturating_add(1);

            if let Some(limit) = self.config.max_consecutive_failures {
                if consecutive_failures >= limit {
                    error!(
                        error = %err,
                        attempts = consecutive_failures,
                        "too many consecutive failures, giving up"
                    );
                    return Err(Error::RetriesExhausted {
                        attempts: consecutive_failures,
                        last_error: err.to_string(),
                    });
                }
            }

            let wait = backoff.next_interval();
            error!(
                error = %err,
                backoff_ms = wait.as_millis() as u64,
                "failed to handle next batch, backoff"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {},
                _ = self.shutdown.cancelled() => {
                    debug!("shutting down while waiting for backoff");
                    return Ok(());
                },
            }
        }
    }

    /// One read-dispatch-acknowledge iteration. Blocks up to the block time.
    async fn handle_next_batch(&self) -> Result<()> {
        let config = &self.config;

        let batches = self
            .store
            .read_group(
                &config.group,
                &config.consumer,
                &config.stream_names,
                config.read_count,
                config.block_time,
            )
            .await?;
        debug!(streams = batches.len(), "called blocking XREADGROUP");

        for data in &batches {
            for entry in &data.entries {
                debug!(
                    stream = %data.key,
                    message_id = %entry.id,
                    values = ?entry.fields,
                    "delegating message"
                );
                self.stats.messages_handled.fetch_add(1, Ordering::Relaxed);

                if let Err(e) = self
                    .delegate
                    .handle_message(&data.key, &entry.id, &entry.fields)
                    .await
                {
                    self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        error = %e,
                        stream = %data.key,
                        message_id = %entry.id,
                        "delegate failed to handle message, skipping ACK"
                    );
                    continue;
                }

                self.store.ack(&data.key, &config.group, &entry.id).await?;
                self.stats.record_ack(&entry.id);
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
