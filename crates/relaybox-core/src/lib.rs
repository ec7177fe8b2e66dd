//! Core types for the relaybox transactional outbox.
//!
//! A business write and the message announcing it are committed in one
//! Postgres transaction; a relay later delivers the message to a broker
//! with at-least-once semantics. This crate holds the durable message
//! model, its validation rules, the read filter, per-cycle forwarding
//! statistics, and the adapter SPI ([`Publisher`], [`MessageTransformer`])
//! that concrete broker integrations implement.

pub mod error;
pub mod filter;
pub mod message;
pub mod publish;
pub mod stats;

pub use error::{BoxError, Error, Result};
pub use filter::MessageFilter;
pub use message::{validate_all, Message, Metadata};
pub use publish::{FnMessageTransformer, MessageTransformer, Publisher};
pub use stats::ForwardStats;
