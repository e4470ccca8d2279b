pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Field level rule violations, the report names the offending field
    /// and the rule that failed.
    #[error("Validation failed: {0}")]
    Validation(#[from] garde::Report),

    #[error("{entity} with the same {field} already exists")]
    AlreadyExists {
        entity: &'static str,
        field: &'static str,
    },

    #[error("Referenced {0} does not exist")]
    MissingReference(&'static str),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid order by field: {0}")]
    InvalidOrderByField(String),
}
