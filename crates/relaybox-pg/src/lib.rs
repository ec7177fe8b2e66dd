//! Postgres side of the relaybox transactional outbox.
//!
//! Three composable primitives:
//!
//! - [`Writer`] inserts outbox messages inside a caller-supplied
//!   transaction, so business state and the messages announcing it commit
//!   atomically.
//! - [`Reader`] + [`Forwarder`] poll unpublished rows, hand them to a
//!   [`relaybox_core::Publisher`], and mark them published, giving
//!   at-least-once delivery.
//! - [`replication::WalReader`] streams freshly inserted rows straight from
//!   the write-ahead log over a logical replication slot, for near-real-time
//!   delivery without polling.

pub mod error;
pub mod forwarder;
pub mod reader;
pub mod replication;
pub mod writer;

pub use error::{PgError, PgResult};
pub use forwarder::{ForwardError, Forwarder, OutboxReader};
pub use reader::Reader;
pub use replication::{RawMessage, WalError, WalReader, WalResult};
pub use writer::Writer;
