use std::sync::PoisonError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Uniqueness error: {0}")]
    Uniqueness(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Field is not indexable: {0}")]
    NotIndexable(String),

    #[error("No {model} found with pk {pk}")]
    DoesNotExist { model: String, pk: String },

    #[error("Implementation error: {0}")]
    Implementation(String),

    #[error("WRONGTYPE operation against key {0} holding the wrong kind of value")]
    WrongType(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl AppError {
    /// True for failures of the store itself rather than of the caller's request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::RedbTransaction(_)
                | AppError::RedbStorage(_)
                | AppError::RedbTable(_)
                | AppError::RedbCommit(_)
                | AppError::Codec(_)
                | AppError::Io(_)
                | AppError::Store(_)
        )
    }
}

impl<T> From<PoisonError<T>> for AppError
{
    fn from(e: PoisonError<T>) -> Self {
        AppError::Custom(format!("Poison error: {}", e))
    }
}
