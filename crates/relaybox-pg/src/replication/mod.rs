//! Streaming outbox reader over Postgres logical replication.
//!
//! Instead of polling, [`WalReader`] subscribes to the write-ahead log
//! through a replication slot and delivers every INSERT against the outbox
//! table as a [`RawMessage`] on a bounded channel, in commit order.
//!
//! Requirements and limitations:
//! - Postgres 15 or higher with `wal_level=logical`, a role carrying
//!   REPLICATION, and `replication=database` in the connection string.
//! - The built-in `pgoutput` plugin, logical replication protocol v2.
//! - Inserts only; one table per publication; no transaction streaming,
//!   no `pg_logical_emit_message()`, no custom column types.

mod connection;
pub mod error;
pub mod lsn;
pub mod pgoutput;
mod raw_message;
mod reader;
mod relation_cache;

pub use error::{WalError, WalResult};
pub use raw_message::{CellValue, RawMessage};
pub use reader::WalReader;
