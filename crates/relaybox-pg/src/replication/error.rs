use thiserror::Error;

/// Errors from the logical-replication path.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("connection string 'replication=database' param is absent")]
    ReplicationParamAbsent,

    #[error("table is empty")]
    TableEmpty,

    #[error("publication is empty")]
    PublicationEmpty,

    #[error("replication slot is empty")]
    SlotEmpty,

    #[error("replication slot is active")]
    SlotActive,

    #[error("table does not exist")]
    TableNotFound,

    #[error("reader is already started")]
    AlreadyStarted,

    #[error("invalid connection string: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// An ErrorResponse from the backend, with its SQLSTATE.
    #[error("server error {code}: {message}")]
    Server {
        severity: String,
        code: String,
        message: String,
    },

    /// A frame that is neither CopyData nor an error. Skipped by the
    /// receive loop, not fatal.
    #[error("unexpected message type '{0}'")]
    UnexpectedMessageType(char),

    #[error("replication connection [closed]: {0}")]
    Closed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("pgoutput decode error: {0}")]
    Decode(String),

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),

    #[error("unknown relation [{0}]")]
    UnknownRelation(u32),

    #[error("column '{column}': {message}")]
    InvalidColumn { column: String, message: String },

    /// The outbound channel is full: the consumer is not draining fast
    /// enough. Terminal; the receive loop never blocks on a slow consumer.
    #[error("raw message channel is full")]
    ChannelFull,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WalResult<T> = Result<T, WalError>;
