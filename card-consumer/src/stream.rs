use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use tokio::time::Instant;
use tracing::info;

use crate::error::StreamError;
use crate::event::{StreamEntry, PAYLOAD_FIELD};

/// A pending entry of the consumer group: delivered at least once, never acked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub deliveries: u64,
}

/// The consumer-group operations the consumer loop needs.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Create the consumer group, and the stream with it, unless it already exists.
    async fn ensure_group(&self) -> Result<(), StreamError>;

    /// Read up to `count` new entries for this consumer, waiting at most `block` when the
    /// stream is empty. An empty batch is not an error.
    async fn read_batch(&self, count: usize, block: Duration)
        -> Result<Vec<StreamEntry>, StreamError>;

    async fn ack(&self, ids: &[String]) -> Result<(), StreamError>;

    /// Pending entries of the whole group that have been idle for at least `min_idle`.
    async fn pending(&self, min_idle: Duration, count: usize)
        -> Result<Vec<PendingEntry>, StreamError>;

    /// Take ownership of pending entries. Entries deleted from the stream are not returned.
    async fn claim(&self, min_idle: Duration, ids: &[String])
        -> Result<Vec<StreamEntry>, StreamError>;
}

fn to_entry(stream_id: StreamId) -> StreamEntry {
    StreamEntry {
        payload: stream_id.get::<String>(PAYLOAD_FIELD),
        id: stream_id.id,
    }
}

fn millis(duration: Duration) -> usize {
    usize::try_from(duration.as_millis()).unwrap_or(usize::MAX)
}

pub struct RedisEventStream {
    connection: MultiplexedConnection,
    key: String,
    group: String,
    consumer: String,
}

impl RedisEventStream {
    /// The connection must not carry a response timeout shorter than the read block timeout.
    pub fn new(
        connection: MultiplexedConnection,
        key: String,
        group: String,
        consumer: String,
    ) -> Self {
        Self {
            connection,
            key,
            group,
            consumer,
        }
    }
}

#[async_trait]
impl EventStream for RedisEventStream {
    async fn ensure_group(&self) -> Result<(), StreamError> {
        let mut conn = self.connection.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.key, &self.group, "0")
            .await;

        match created {
            Ok(()) => {
                info!(stream = %self.key, group = %self.group, "created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_batch(
        &self,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let mut conn = self.connection.clone();
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count)
            .block(millis(block));

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.key], &[">"], &options)
            .await?;

        Ok(reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .map(to_entry)
            .collect())
    }

    async fn ack(&self, ids: &[String]) -> Result<(), StreamError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        conn.xack::<_, _, _, u64>(&self.key, &self.group, ids).await?;
        Ok(())
    }

    async fn pending(
        &self,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let mut conn = self.connection.clone();
        let reply: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.key)
            .arg(&self.group)
            .arg("IDLE")
            .arg(millis(min_idle))
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                id: p.id,
                deliveries: p.times_delivered as u64,
            })
            .collect())
    }

    async fn claim(
        &self,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>, StreamError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        let reply: StreamClaimReply = conn
            .xclaim(&self.key, &self.group, &self.consumer, millis(min_idle), ids)
            .await?;

        Ok(reply.ids.into_iter().map(to_entry).collect())
    }
}

enum Step {
    Entry(StreamEntry),
    ReadError,
}

struct MockPending {
    entry: StreamEntry,
    deliveries: u64,
    delivered_at: Instant,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Step>,
    pending: Vec<MockPending>,
    acked: Vec<String>,
    reads: Vec<Instant>,
    claims: Vec<Vec<String>>,
}

/// In-memory stream for tests. Entries and read failures are delivered in the order they were
/// queued; an empty read sleeps for the block timeout like a real blocking read.
#[derive(Clone, Default)]
pub struct MockEventStream {
    state: Arc<Mutex<MockState>>,
}

impl MockEventStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push(&self, entry: StreamEntry) -> &Self {
        self.lock().script.push_back(Step::Entry(entry));
        self
    }

    pub fn push_read_error(&self) -> &Self {
        self.lock().script.push_back(Step::ReadError);
        self
    }

    /// Seed an entry that was already delivered `deliveries` times and never acked.
    pub fn add_pending(&self, entry: StreamEntry, deliveries: u64) -> &Self {
        self.lock().pending.push(MockPending {
            entry,
            deliveries,
            delivered_at: Instant::now(),
        });
        self
    }

    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.lock().pending.iter().map(|p| p.entry.id.clone()).collect()
    }

    pub fn reads(&self) -> Vec<Instant> {
        self.lock().reads.clone()
    }

    pub fn claims(&self) -> Vec<Vec<String>> {
        self.lock().claims.clone()
    }
}

#[async_trait]
impl EventStream for MockEventStream {
    async fn ensure_group(&self) -> Result<(), StreamError> {
        Ok(())
    }

    async fn read_batch(
        &self,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let batch = {
            let mut state = self.lock();
            state.reads.push(Instant::now());

            if matches!(state.script.front(), Some(Step::ReadError)) {
                state.script.pop_front();
                return Err(StreamError::Timeout);
            }

            let mut batch = Vec::new();
            while batch.len() < count {
                match state.script.pop_front() {
                    Some(Step::Entry(entry)) => batch.push(entry),
                    Some(step) => {
                        state.script.push_front(step);
                        break;
                    }
                    None => break,
                }
            }

            let now = Instant::now();
            for entry in &batch {
                state.pending.push(MockPending {
                    entry: entry.clone(),
                    deliveries: 1,
                    delivered_at: now,
                });
            }
            batch
        };

        if batch.is_empty() {
            tokio::time::sleep(block).await;
        }
        Ok(batch)
    }

    async fn ack(&self, ids: &[String]) -> Result<(), StreamError> {
        let mut state = self.lock();
        state.pending.retain(|p| !ids.contains(&p.entry.id));
        state.acked.extend(ids.iter().cloned());
        Ok(())
    }

    async fn pending(
        &self,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        Ok(self
            .lock()
            .pending
            .iter()
            .filter(|p| p.delivered_at.elapsed() >= min_idle)
            .take(count)
            .map(|p| PendingEntry {
                id: p.entry.id.clone(),
                deliveries: p.deliveries,
            })
            .collect())
    }

    async fn claim(
        &self,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let mut state = self.lock();
        state.claims.push(ids.to_vec());

        let now = Instant::now();
        let mut claimed = Vec::new();
        for pending in state.pending.iter_mut() {
            if ids.contains(&pending.entry.id) && pending.delivered_at.elapsed() >= min_idle {
                pending.deliveries += 1;
                pending.delivered_at = now;
                claimed.push(pending.entry.clone());
            }
        }
        Ok(claimed)
    }
}
