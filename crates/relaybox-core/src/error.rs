use thiserror::Error;

/// Errors produced by message validation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("broker is empty")]
    BrokerEmpty,

    #[error("topic is empty")]
    TopicEmpty,

    #[error("payload is empty")]
    PayloadEmpty,

    #[error("payload is not valid JSON: {0}")]
    PayloadNotJson(#[source] serde_json::Error),

    /// Positional wrapper used when validating a batch of messages.
    #[error("message idx[{index}]: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error type for adapter implementations ([`crate::Publisher`],
/// [`crate::MessageTransformer`]). Adapters report whatever their broker
/// SDK produces.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
