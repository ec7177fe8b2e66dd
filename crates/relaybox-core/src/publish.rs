use std::future::Future;

use crate::error::BoxError;
use crate::message::Message;

/// Delivers one message to a broker.
///
/// Implementations must be synchronous from the forwarder's point of view
/// (the returned future resolves only once the broker accepted or rejected
/// the message) and should propagate trace identifiers found in
/// `message.metadata`. Downstream consumers must tolerate duplicates: the
/// forwarder retries anything it could not acknowledge.
pub trait Publisher: Send + Sync {
    fn publish(&self, message: &Message) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// Maps a [`Message`] to a broker-specific request.
///
/// Concrete publishers (an SNS adapter, a Kafka producer) are built over a
/// transformer so that the mapping is testable without broker I/O.
pub trait MessageTransformer: Send + Sync {
    type Request;

    fn transform(&self, message: &Message) -> Result<Self::Request, BoxError>;
}

/// A transformer that wraps a function.
pub struct FnMessageTransformer<F, R>
where
    F: Fn(&Message) -> Result<R, BoxError> + Send + Sync,
{
    func: F,
}

impl<F, R> FnMessageTransformer<F, R>
where
    F: Fn(&Message) -> Result<R, BoxError> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, R> MessageTransformer for FnMessageTransformer<F, R>
where
    F: Fn(&Message) -> Result<R, BoxError> + Send + Sync,
{
    type Request = R;

    fn transform(&self, message: &Message) -> Result<R, BoxError> {
        (self.func)(message)
    }
}
