use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

/// Errors raised by the data-access layer.
///
/// Every variant names the operation that failed (`op`) so callers can log a
/// single line without reconstructing context.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{op}: not connected to the database")]
    NotConnected { op: &'static str },

    #[error("{op}: invalid table definition: {reason}")]
    InvalidDefinition { op: &'static str, reason: String },

    #[error("{op}: invalid record: {reason}")]
    InvalidRecord { op: &'static str, reason: String },

    #[error("{op}: invalid destination: {reason}")]
    InvalidDestination { op: &'static str, reason: String },

    #[error("{op}: no data to write to {table}")]
    NoData { op: &'static str, table: String },

    #[error("{op}: refusing to modify {table} without a WHERE clause")]
    MissingWhereClause { op: &'static str, table: String },

    #[error("{op}: failed to build query: {reason}")]
    QueryBuild { op: &'static str, reason: String },

    #[error("{op}: query failed: {source}")]
    QueryExec {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{op}: no rows affected in {table}")]
    NoRowsAffected { op: &'static str, table: String },

    #[error("Connection error: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    pub fn build(op: &'static str, reason: impl Into<String>) -> Self {
        DbError::QueryBuild {
            op,
            reason: reason.into(),
        }
    }

    pub fn exec(op: &'static str, source: sqlx::Error) -> Self {
        DbError::QueryExec { op, source }
    }

    pub fn definition(op: &'static str, reason: impl Into<String>) -> Self {
        DbError::InvalidDefinition {
            op,
            reason: reason.into(),
        }
    }

    /// Name of the operation that produced this error, if it carries one.
    pub fn op(&self) -> Option<&'static str> {
        match self {
            DbError::NotConnected { op }
            | DbError::InvalidDefinition { op, .. }
            | DbError::InvalidRecord { op, .. }
            | DbError::InvalidDestination { op, .. }
            | DbError::NoData { op, .. }
            | DbError::MissingWhereClause { op, .. }
            | DbError::QueryBuild { op, .. }
            | DbError::QueryExec { op, .. }
            | DbError::NoRowsAffected { op, .. } => Some(op),
            DbError::Connect(_) | DbError::Config(_) => None,
        }
    }

    /// Re-attribute an error raised by a helper to the public operation that
    /// called it.
    pub fn in_op(mut self, name: &'static str) -> Self {
        match &mut self {
            DbError::NotConnected { op }
            | DbError::InvalidDefinition { op, .. }
            | DbError::InvalidRecord { op, .. }
            | DbError::InvalidDestination { op, .. }
            | DbError::NoData { op, .. }
            | DbError::MissingWhereClause { op, .. }
            | DbError::QueryBuild { op, .. }
            | DbError::QueryExec { op, .. }
            | DbError::NoRowsAffected { op, .. } => *op = name,
            DbError::Connect(_) | DbError::Config(_) => {}
        }
        self
    }
}
