use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type PersistResult<T> = Result<T, PersistError>;
