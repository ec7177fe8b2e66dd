//! Forwarder: read unpublished messages, publish them, acknowledge.

use std::future::Future;

use deadpool_postgres::Pool;
use relaybox_core::{ForwardStats, Message, Publisher};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{PgError, PgResult};
use crate::reader::Reader;

/// The reader capability the forwarder drives. [`Reader`] is the Postgres
/// implementation; tests substitute an in-memory one.
pub trait OutboxReader: Send + Sync {
    fn read(&self, limit: i64) -> impl Future<Output = PgResult<Vec<Message>>> + Send;

    fn ack(&self, ids: &[i64]) -> impl Future<Output = PgResult<u64>> + Send;
}

impl OutboxReader for Reader {
    async fn read(&self, limit: i64) -> PgResult<Vec<Message>> {
        Reader::read(self, limit).await
    }

    async fn ack(&self, ids: &[i64]) -> PgResult<u64> {
        Reader::ack(self, ids).await
    }
}

/// A forward cycle that stopped early. Carries the counters accumulated
/// before the failure: under a publish error they tell the operator how far
/// the cycle got; everything read but unacked is re-sent next cycle.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ForwardError {
    pub stats: ForwardStats,
    #[source]
    pub source: PgError,
}

/// Drives read → publish → ack cycles with at-least-once semantics.
///
/// Run at most one forwarder per (table, filter) pair; shard a busy table
/// with disjoint filters instead. Parallel invocations are legal but only
/// amplify duplicate deliveries.
#[derive(Clone)]
pub struct Forwarder<R, P> {
    reader: R,
    publisher: P,
}

impl<P: Publisher> Forwarder<Reader, P> {
    /// Compose a forwarder over a default [`Reader`] for `table`.
    pub fn from_pool(table: impl Into<String>, pool: Pool, publisher: P) -> PgResult<Self> {
        Ok(Self::new(Reader::new(table, pool)?, publisher))
    }
}

impl<R: OutboxReader, P: Publisher> Forwarder<R, P> {
    pub fn new(reader: R, publisher: P) -> Self {
        Self { reader, publisher }
    }

    /// Run one forward cycle over at most `limit` messages.
    ///
    /// Messages are published in id-ascending order. The first publish
    /// failure aborts the cycle: nothing read in it is acknowledged, so the
    /// already-published prefix is re-published on the next cycle and
    /// downstream consumers must be idempotent. A message that fails
    /// persistently blocks everything behind it; that head-of-line stall is
    /// deliberate and operator-visible.
    pub async fn forward(&self, limit: i64) -> Result<ForwardStats, ForwardError> {
        let mut stats = ForwardStats::default();

        let messages = self
            .reader
            .read(limit)
            .await
            .map_err(|source| ForwardError { stats, source })?;
        if messages.is_empty() {
            return Ok(stats);
        }
        stats.read = messages.len();

        for (index, message) in messages.iter().enumerate() {
            if let Err(source) = self.publisher.publish(message).await {
                warn!(
                    index,
                    id = message.id,
                    topic = %message.topic,
                    "publish failed, aborting forward cycle"
                );
                return Err(ForwardError {
                    stats,
                    source: PgError::Publish {
                        index,
                        topic: message.topic.clone(),
                        id: message.id,
                        source,
                    },
                });
            }
            stats.published += 1;
        }

        // Ack everything read, not just published: the loop above only
        // completes when every read message was published.
        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        stats.acked = self
            .reader
            .ack(&ids)
            .await
            .map_err(|source| ForwardError { stats, source })? as usize;

        debug!(%stats, "forward cycle complete");

        Ok(stats)
    }
}
