//! SQL layer errors.

use thiserror::Error;

use streamscope_cluster::ClusterError;

pub type Result<T> = std::result::Result<T, SqlError>;

#[derive(Debug, Error)]
pub enum SqlError {
    /// Malformed query text. `position` is a byte offset into the query, 0
    /// when the underlying parser gave no location.
    #[error("syntax error at byte {position}: expected {expected}")]
    Syntax { position: usize, expected: String },

    /// Well-formed query that cannot mean anything: unknown field, type
    /// mismatch, non-positive LIMIT, or an aggregate mixed with raw fields.
    #[error("semantic error: {reason}")]
    Semantic { reason: String },

    /// The resolved snapshot has no such topic.
    #[error("topic '{topic}' not found")]
    TopicNotFound { topic: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_actionable() {
        let err = SqlError::Syntax {
            position: 7,
            expected: "FROM".into(),
        };
        assert_eq!(err.to_string(), "syntax error at byte 7: expected FROM");

        let err = SqlError::TopicNotFound {
            topic: "orders".into(),
        };
        assert!(err.to_string().contains("orders"));
    }
}
