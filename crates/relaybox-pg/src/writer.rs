//! Outbox writer: inserts messages inside the caller's transaction.

use futures::future;
use relaybox_core::{validate_all, Message};
use tokio_postgres::Transaction;
use tracing::debug;

use crate::error::{PgError, PgResult};

/// Writes outbox messages to a single outbox table.
///
/// To write to multiple outbox tables, create multiple writers. The
/// transaction argument is the caller's: the writer never begins or commits
/// anything, which is what makes the business write and the enqueue atomic.
/// `deadpool_postgres::Transaction` is accepted through deref coercion, so
/// both pooled and plain `tokio-postgres` transactions work.
///
/// Safe for concurrent use from different transactions.
#[derive(Debug, Clone)]
pub struct Writer {
    table: String,
    prepared_batch: bool,
}

impl Writer {
    pub fn new(table: impl Into<String>) -> PgResult<Self> {
        let table = table.into();
        if table.is_empty() {
            return Err(PgError::TableEmpty);
        }

        Ok(Self {
            table,
            prepared_batch: true,
        })
    }

    /// Make [`Writer::write_batch`] send the INSERT text with every queued
    /// query instead of preparing it once per call.
    pub fn disable_prepared_batch(mut self) -> Self {
        self.prepared_batch = false;
        self
    }

    /// Insert one message; returns the id assigned by the database.
    ///
    /// Fails if the message is invalid or the insert fails. Validation runs
    /// before any I/O.
    pub async fn write(&self, tx: &Transaction<'_>, message: &Message) -> PgResult<i64> {
        message.validate()?;

        let metadata = metadata_json(message);
        let payload = message.payload_json()?;

        let sql = self.insert_sql();
        let row = tx
            .query_one(
                sql.as_str(),
                &[&message.broker, &message.topic, &metadata, &payload],
            )
            .await?;

        let id: i64 = row.get(0);
        debug!(table = %self.table, id, "outbox message written");

        Ok(id)
    }

    /// Insert many messages over the pipelined connection; returns ids in
    /// input order.
    ///
    /// Empty input returns empty output. Every message is validated up
    /// front, reporting the index of the first invalid one. A single
    /// message delegates to [`Writer::write`]. Otherwise one query per
    /// message is queued concurrently on the transaction's connection;
    /// unless prepared batching is disabled, the INSERT is prepared once
    /// and every queued query references the prepared statement.
    pub async fn write_batch(
        &self,
        tx: &Transaction<'_>,
        messages: &[Message],
    ) -> PgResult<Vec<i64>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        validate_all(messages)?;

        if messages.len() == 1 {
            return Ok(vec![self.write(tx, &messages[0]).await?]);
        }

        let sql = self.insert_sql();

        let ids = if self.prepared_batch {
            let statement = tx.prepare(&sql).await?;
            future::try_join_all(messages.iter().map(|message| {
                let statement = statement.clone();
                async move {
                    let metadata = metadata_json(message);
                    let payload = message.payload_json()?;
                    let row = tx
                        .query_one(
                            &statement,
                            &[&message.broker, &message.topic, &metadata, &payload],
                        )
                        .await?;
                    Ok::<i64, PgError>(row.get(0))
                }
            }))
            .await?
        } else {
            future::try_join_all(messages.iter().map(|message| {
                let sql = sql.as_str();
                async move {
                    let metadata = metadata_json(message);
                    let payload = message.payload_json()?;
                    let row = tx
                        .query_one(
                            sql,
                            &[&message.broker, &message.topic, &metadata, &payload],
                        )
                        .await?;
                    Ok::<i64, PgError>(row.get(0))
                }
            }))
            .await?
        };

        debug!(table = %self.table, count = ids.len(), "outbox batch written");

        Ok(ids)
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (broker, topic, metadata, payload) VALUES ($1, $2, $3, $4) RETURNING id",
            self.table
        )
    }
}

fn metadata_json(message: &Message) -> Option<serde_json::Value> {
    message.metadata.as_ref().map(|m| {
        serde_json::Value::Object(
            m.iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    })
}
