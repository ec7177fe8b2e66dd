//! The WAL reader: a logical-replication subscription on the outbox table.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::connection::{
    parse_keepalive, parse_xlog_data, quote_literal, ConnectParams, Frame, ReplicationConnection,
};
use super::error::{WalError, WalResult};
use super::lsn::format_lsn;
use super::pgoutput::{self, LogicalMessage};
use super::raw_message::{insert_to_raw, RawMessage};
use super::relation_cache::RelationCache;

const DEFAULT_STANDBY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CHANNEL_BUFFER: usize = 10_000;

/// SQLSTATE for "relation does not exist".
const UNDEFINED_TABLE: &str = "42P01";

/// Streams newly inserted outbox rows from the write-ahead log.
///
/// [`WalReader::start`] ensures the publication and the replication slot
/// exist, subscribes at the server's current position, and spawns a
/// receive loop that delivers every INSERT against the watched table as a
/// [`RawMessage`] on a bounded channel, in commit order.
///
/// The slot owns the consumer's position: receipt of each message is
/// confirmed to the server via standby status updates, so WAL is trimmed
/// eagerly and a restarted reader resumes from the last confirmation.
/// Consumers must therefore be prepared to re-see messages delivered since
/// that confirmation — the at-least-once contract again.
pub struct WalReader {
    params: ConnectParams,
    table: String,
    publication: String,
    slot: String,

    permanent_slot: bool,
    standby_timeout: Duration,
    channel_buffer: usize,

    started: bool,
    close: CancellationToken,
}

impl WalReader {
    /// Build a reader. The connection string must carry
    /// `replication=database`: replication commands such as
    /// `IDENTIFY_SYSTEM` are refused on regular sessions.
    pub fn new(
        conn_str: &str,
        table: impl Into<String>,
        publication: impl Into<String>,
        slot: impl Into<String>,
    ) -> WalResult<Self> {
        let params = ConnectParams::parse(conn_str)?;
        if !params.replication_database {
            return Err(WalError::ReplicationParamAbsent);
        }

        let table = table.into();
        if table.is_empty() {
            return Err(WalError::TableEmpty);
        }
        let publication = publication.into();
        if publication.is_empty() {
            return Err(WalError::PublicationEmpty);
        }
        let slot = slot.into();
        if slot.is_empty() {
            return Err(WalError::SlotEmpty);
        }

        Ok(Self {
            params,
            table,
            publication,
            slot,
            permanent_slot: false,
            standby_timeout: DEFAULT_STANDBY_TIMEOUT,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
            started: false,
            close: CancellationToken::new(),
        })
    }

    /// Keep the slot across disconnects. The default is a temporary slot,
    /// dropped by the server when the session ends.
    pub fn permanent_slot(mut self) -> Self {
        self.permanent_slot = true;
        self
    }

    /// Maximum interval between standby-status heartbeats (default 10 s).
    pub fn standby_timeout(mut self, timeout: Duration) -> Self {
        self.standby_timeout = timeout;
        self
    }

    /// Capacity of the outbound [`RawMessage`] channel (default 10 000).
    /// When the consumer falls this far behind, the reader stops with
    /// [`WalError::ChannelFull`] rather than block its heartbeats.
    pub fn channel_buffer(mut self, buffer: usize) -> Self {
        self.channel_buffer = buffer;
        self
    }

    /// Open the replication session and start streaming.
    ///
    /// Synchronous phase: connect, create the publication if missing
    /// (insert-only, single table), refuse an already-active slot, create
    /// the slot if missing, and `START_REPLICATION` from the server's
    /// current position. Then the receive loop is spawned; its terminal
    /// error, if any, arrives on the second channel before both close.
    ///
    /// A reader streams once: a second call fails with
    /// [`WalError::AlreadyStarted`].
    pub async fn start(
        &mut self,
    ) -> WalResult<(mpsc::Receiver<RawMessage>, mpsc::Receiver<WalError>)> {
        if self.started {
            return Err(WalError::AlreadyStarted);
        }

        let mut conn = ReplicationConnection::connect(&self.params).await?;

        if !self.publication_exists(&mut conn).await? {
            self.create_publication(&mut conn).await?;
        }

        let (slot_exists, slot_active) = self.slot_status(&mut conn).await?;
        if slot_active {
            return Err(WalError::SlotActive);
        }
        if !slot_exists {
            conn.create_replication_slot(&self.slot, !self.permanent_slot)
                .await?;
        }

        let identity = conn.identify_system().await?;
        info!(
            system_id = %identity.system_id,
            timeline = %identity.timeline,
            xlog_pos = %format_lsn(identity.xlog_pos),
            "replication session identified"
        );

        conn.start_replication(&self.slot, identity.xlog_pos, &self.publication)
            .await?;

        self.started = true;

        let (msg_tx, msg_rx) = mpsc::channel(self.channel_buffer.max(1));
        let (err_tx, err_rx) = mpsc::channel(1);

        let close = self.close.clone();
        let standby_timeout = self.standby_timeout;
        let start_lsn = identity.xlog_pos;
        tokio::spawn(async move {
            if let Err(e) = receive_loop(conn, msg_tx, close, standby_timeout, start_lsn).await {
                error!(error = %e, "replication receive loop terminated");
                let _ = err_tx.try_send(e);
            }
            // Both senders drop here, closing the channels.
        });

        Ok((msg_rx, err_rx))
    }

    /// Stop the receive loop and drop the connection. Idempotent. A
    /// temporary slot is released by the server once the session ends.
    pub fn close(&self) {
        self.close.cancel();
    }

    async fn publication_exists(&self, conn: &mut ReplicationConnection) -> WalResult<bool> {
        let rows = conn
            .simple_query(&format!(
                "SELECT pubname FROM pg_publication WHERE pubname = '{}'",
                quote_literal(&self.publication)
            ))
            .await?;

        Ok(!rows.is_empty())
    }

    async fn create_publication(&self, conn: &mut ReplicationConnection) -> WalResult<()> {
        info!(publication = %self.publication, table = %self.table, "creating publication");

        let sql = format!(
            "CREATE PUBLICATION {} FOR TABLE {} WITH (publish = 'insert')",
            self.publication, self.table
        );

        match conn.simple_query(&sql).await {
            Ok(_) => Ok(()),
            Err(WalError::Server { ref code, .. }) if code == UNDEFINED_TABLE => {
                Err(WalError::TableNotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the slot exists and whether another consumer holds it.
    async fn slot_status(&self, conn: &mut ReplicationConnection) -> WalResult<(bool, bool)> {
        let rows = conn
            .simple_query(&format!(
                "SELECT active FROM pg_replication_slots WHERE slot_name = '{}'",
                quote_literal(&self.slot)
            ))
            .await?;

        match rows.first().and_then(|row| row.first()) {
            None => Ok((false, false)),
            Some(cell) => {
                let active = cell.as_deref() == Some(b"t".as_slice());
                Ok((true, active))
            }
        }
    }
}

impl Drop for WalReader {
    fn drop(&mut self) {
        self.close.cancel();
    }
}

/// The receive loop: heartbeats, frame dispatch, insert delivery.
///
/// Single task, sole owner of the connection. Exits on close, on context
/// teardown (consumer dropped), or with a terminal error.
async fn receive_loop(
    mut conn: ReplicationConnection,
    msg_tx: mpsc::Sender<RawMessage>,
    close: CancellationToken,
    standby_timeout: Duration,
    start_lsn: u64,
) -> WalResult<()> {
    let mut relations = RelationCache::new();
    let mut last_received_lsn = start_lsn;
    // First iteration confirms the starting position immediately
    let mut next_deadline = Instant::now();

    loop {
        if Instant::now() >= next_deadline {
            conn.send_standby_status(last_received_lsn).await?;
            trace!(lsn = %format_lsn(last_received_lsn), "standby status sent");
            next_deadline = Instant::now() + standby_timeout;
        }

        let frame = tokio::select! {
            _ = close.cancelled() => {
                debug!("close requested, leaving receive loop");
                return Ok(());
            }
            received = timeout_at(next_deadline, conn.next_frame()) => match received {
                // Deadline reached is not an error: heartbeat next iteration
                Err(_elapsed) => continue,
                Ok(Ok(frame)) => frame,
                Ok(Err(WalError::UnexpectedMessageType(kind))) => {
                    debug!(frame = %kind, "skipping unexpected frame");
                    continue;
                }
                Ok(Err(e)) => return Err(e),
            }
        };

        let data = match frame {
            Frame::CopyData(data) => data,
            Frame::CopyDone => {
                return Err(WalError::Closed("server ended the replication stream".into()))
            }
        };
        let Some((&kind, payload)) = data.split_first() else {
            continue;
        };

        match kind {
            b'k' => {
                let keepalive = parse_keepalive(payload)?;
                if keepalive.wal_end > last_received_lsn {
                    // The slot only sees changes for its publication, so
                    // the server's WAL end may run ahead of anything we
                    // were sent; confirming it keeps retained WAL small.
                    last_received_lsn = keepalive.wal_end;
                }
                if keepalive.reply_requested {
                    next_deadline = Instant::now();
                }
            }
            b'w' => {
                let xlog = parse_xlog_data(payload)?;

                match pgoutput::decode(&xlog.data)? {
                    LogicalMessage::Relation(relation) => {
                        debug!(
                            relation_id = relation.id,
                            table = %relation.name,
                            columns = relation.columns.len(),
                            "cached relation schema"
                        );
                        relations.update(relation);
                    }
                    LogicalMessage::Insert(insert) => {
                        let raw = insert_to_raw(&insert, &relations)?;
                        match msg_tx.try_send(raw) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => return Err(WalError::ChannelFull),
                            Err(TrySendError::Closed(_)) => {
                                debug!("message receiver dropped, stopping");
                                return Ok(());
                            }
                        }
                    }
                    LogicalMessage::Begin(begin) => {
                        trace!(xid = begin.xid, "transaction begin")
                    }
                    LogicalMessage::Commit(commit) => {
                        trace!(end_lsn = %format_lsn(commit.end_lsn), "transaction commit")
                    }
                    LogicalMessage::Skipped(kind) => {
                        trace!(kind = %kind, "ignored logical message")
                    }
                }

                if xlog.wal_start > last_received_lsn {
                    last_received_lsn = xlog.wal_start;
                }
            }
            other => debug!(byte = other, "unknown replication payload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONN_STR: &str = "host=localhost user=postgres replication=database";

    #[test]
    fn test_new_validates_fields() {
        assert!(WalReader::new(CONN_STR, "outbox_messages", "outbox_pub", "outbox_slot").is_ok());

        assert!(matches!(
            WalReader::new("host=localhost user=postgres", "t", "p", "s"),
            Err(WalError::ReplicationParamAbsent)
        ));
        assert!(matches!(
            WalReader::new(CONN_STR, "", "p", "s"),
            Err(WalError::TableEmpty)
        ));
        assert!(matches!(
            WalReader::new(CONN_STR, "t", "", "s"),
            Err(WalError::PublicationEmpty)
        ));
        assert!(matches!(
            WalReader::new(CONN_STR, "t", "p", ""),
            Err(WalError::SlotEmpty)
        ));
    }

    #[test]
    fn test_new_accepts_url_form() {
        let reader = WalReader::new(
            "postgres://repl@localhost:5432/app?replication=database",
            "outbox_messages",
            "outbox_pub",
            "outbox_slot",
        );
        assert!(reader.is_ok());
    }

    #[test]
    fn test_options_override_defaults() {
        let reader = WalReader::new(CONN_STR, "t", "p", "s")
            .unwrap()
            .permanent_slot()
            .standby_timeout(Duration::from_secs(3))
            .channel_buffer(64);

        assert!(reader.permanent_slot);
        assert_eq!(reader.standby_timeout, Duration::from_secs(3));
        assert_eq!(reader.channel_buffer, 64);
    }

    #[test]
    fn test_close_is_idempotent() {
        let reader = WalReader::new(CONN_STR, "t", "p", "s").unwrap();
        reader.close();
        reader.close();
        assert!(reader.close.is_cancelled());
    }
}
