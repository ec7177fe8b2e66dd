use relaybox_core::BoxError;
use thiserror::Error;

/// Errors from the polling path (writer, reader, forwarder).
#[derive(Debug, Error)]
pub enum PgError {
    #[error("table is empty")]
    TableEmpty,

    #[error("limit must be GT 0, got {0}")]
    InvalidLimit(i64),

    #[error("invalid message: {0}")]
    Validation(#[from] relaybox_core::Error),

    #[error("postgres error: {0}")]
    Postgres(String),

    #[error("pool error: {0}")]
    Pool(String),

    /// A broker publish failed mid-cycle. Index is the position within the
    /// batch that was read; everything before it was published but not yet
    /// acknowledged and will be re-sent.
    #[error("publish index[{index}] topic[{topic}] id[{id}]: {source}")]
    Publish {
        index: usize,
        topic: String,
        id: i64,
        #[source]
        source: BoxError,
    },
}

impl From<tokio_postgres::Error> for PgError {
    fn from(e: tokio_postgres::Error) -> Self {
        // Surface database error details when present
        if let Some(db_err) = e.as_db_error() {
            PgError::Postgres(format!(
                "{}: {} (code: {})",
                db_err.severity(),
                db_err.message(),
                db_err.code().code()
            ))
        } else {
            PgError::Postgres(e.to_string())
        }
    }
}

impl From<deadpool_postgres::PoolError> for PgError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        PgError::Pool(e.to_string())
    }
}

pub type PgResult<T> = Result<T, PgError>;
