use std::borrow::Cow;

use thiserror::Error;

use crate::report::Side;

/// Error returned by a graph session for a single query.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Endpoint unreachable, authentication rejected, or the connection dropped.
    #[error("connection error: {message}")]
    Connection { message: Cow<'static, str> },

    /// The endpoint answered but rejected or failed the query.
    #[error("query failed: {message}")]
    Query { message: Cow<'static, str> },

    /// A row came back without the column the query promised.
    #[error("malformed row: missing column '{column}'")]
    MissingColumn { column: String },
}

impl SessionError {
    pub fn connection(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Connection { message: message.into() }
    }

    pub fn query(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Query { message: message.into() }
    }

    /// Fatal errors abort the whole run; everything else degrades per type.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Top-level error type for a comparison run.
#[derive(Debug, Error)]
pub enum DiffError {
    /// One side could not be reached; the run cannot continue.
    #[error("{side} endpoint unavailable: {source}")]
    Connection {
        side: Side,
        #[source]
        source: SessionError,
    },

    /// Writing the report failed.
    #[error("report i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the report failed.
    #[error("report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl DiffError {
    pub fn connection(side: Side, source: SessionError) -> Self {
        Self::Connection { side, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_fatal() {
        assert!(SessionError::connection("refused").is_fatal());
        assert!(!SessionError::query("unknown label").is_fatal());
        assert!(
            !SessionError::MissingColumn {
                column: "count".to_string()
            }
            .is_fatal()
        );
    }

    #[test]
    fn connection_error_names_side() {
        let err = DiffError::connection(Side::Target, SessionError::connection("refused"));
        assert_eq!(err.to_string(), "target endpoint unavailable: connection error: refused");
    }
}
