use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A write that would break a table invariant: duplicate id, or a
    /// deadline not after creation.
    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}
