//! Polling reader: selects unpublished rows and marks them published.

use chrono::Utc;
use deadpool_postgres::Pool;
use relaybox_core::{Message, MessageFilter, Metadata};
use tokio_postgres::types::ToSql;
use tracing::debug;

use crate::error::{PgError, PgResult};

/// Reads unpublished messages from a single outbox table.
///
/// Read and ack happen in different transactions; the `published_at IS
/// NULL` predicate in [`Reader::ack`] makes acking idempotent, so two
/// readers racing on overlapping filters duplicate work but never corrupt
/// state. Most users interact with a [`crate::Forwarder`] instead of a
/// reader directly.
#[derive(Clone)]
pub struct Reader {
    table: String,
    pool: Pool,
    filter: MessageFilter,
}

impl Reader {
    pub fn new(table: impl Into<String>, pool: Pool) -> PgResult<Self> {
        let table = table.into();
        if table.is_empty() {
            return Err(PgError::TableEmpty);
        }

        Ok(Self {
            table,
            pool,
            filter: MessageFilter::default(),
        })
    }

    /// Apply a filter to every read. Default is no restriction.
    pub fn with_filter(mut self, filter: MessageFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Fetch up to `limit` unpublished messages matching the configured
    /// filter, ordered by id ascending. Takes no row locks: visibility is
    /// defined entirely by the filter, the limit and `published_at IS NULL`.
    pub async fn read(&self, limit: i64) -> PgResult<Vec<Message>> {
        if limit <= 0 {
            return Err(PgError::InvalidLimit(limit));
        }

        let (sql, brokers, topics) = self.select_sql();

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(3);
        if let Some(ref brokers) = brokers {
            params.push(brokers);
        }
        if let Some(ref topics) = topics {
            params.push(topics);
        }
        params.push(&limit);

        let client = self.pool.get().await?;
        let rows = client.query(sql.as_str(), &params).await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(row_to_message(&row)?);
        }

        debug!(table = %self.table, count = messages.len(), "outbox read");

        Ok(messages)
    }

    /// Mark the rows with the given ids as published, stamping the current
    /// UTC time. Returns the number of rows actually updated; duplicate
    /// ids, already-acked rows and unknown ids are silently skipped.
    pub async fn ack(&self, ids: &[i64]) -> PgResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let ids: Vec<i64> = ids.to_vec();

        let sql = format!(
            "UPDATE {} SET published_at = $1 WHERE id = ANY($2) AND published_at IS NULL",
            self.table
        );

        let client = self.pool.get().await?;
        let affected = client.execute(sql.as_str(), &[&now, &ids]).await?;

        debug!(table = %self.table, requested = ids.len(), affected, "outbox acked");

        Ok(affected)
    }

    /// Build the SELECT text plus the owned filter params it binds.
    fn select_sql(&self) -> (String, Option<Vec<String>>, Option<Vec<String>>) {
        let mut sql = format!(
            "SELECT id, broker, topic, metadata, payload FROM {} WHERE published_at IS NULL",
            self.table
        );

        let mut placeholder = 0;
        let brokers = if self.filter.brokers.is_empty() {
            None
        } else {
            placeholder += 1;
            sql.push_str(&format!(" AND broker = ANY(${placeholder})"));
            Some(self.filter.brokers.clone())
        };
        let topics = if self.filter.topics.is_empty() {
            None
        } else {
            placeholder += 1;
            sql.push_str(&format!(" AND topic = ANY(${placeholder})"));
            Some(self.filter.topics.clone())
        };

        placeholder += 1;
        sql.push_str(&format!(" ORDER BY id ASC LIMIT ${placeholder}"));

        (sql, brokers, topics)
    }
}

fn row_to_message(row: &tokio_postgres::Row) -> PgResult<Message> {
    let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
    let metadata = match metadata {
        Some(value) => Some(
            serde_json::from_value::<Metadata>(value)
                .map_err(|e| PgError::Postgres(format!("metadata column: {e}")))?,
        ),
        None => None,
    };

    let payload: serde_json::Value = row.try_get("payload")?;
    let payload = serde_json::to_vec(&payload)
        .map_err(|e| PgError::Postgres(format!("payload column: {e}")))?;

    Ok(Message {
        id: row.try_get("id")?,
        broker: row.try_get("broker")?,
        topic: row.try_get("topic")?,
        metadata,
        payload,
    })
}
