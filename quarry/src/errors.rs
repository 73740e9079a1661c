use std::fmt;

use stratum::StorageError;

/// Execution-layer failures. Storage errors pass through unchanged so a
/// lock-timeout abort keeps its identity across the operator boundary.
#[derive(Debug)]
pub enum ExecutionError {
    Storage(StorageError),
    /// `next` past the end of an iterator.
    NoSuchElement,
    /// The iterator contract was violated: `has_next`/`next` on a closed
    /// or never-opened operator, or a malformed operator tree.
    IllegalState(String),
    /// An aggregate the operand type cannot support.
    Unsupported(String),
    /// A tuple or field that does not line up with the schema in play.
    FieldMismatch(String),
}

impl ExecutionError {
    /// True when the underlying cause is a lock-timeout abort, which the
    /// driving thread answers with `transaction_complete(tid, false)`.
    pub fn is_transaction_abort(&self) -> bool {
        matches!(
            self,
            ExecutionError::Storage(StorageError::TransactionAborted)
        )
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Storage(err) => write!(f, "{err}"),
            ExecutionError::NoSuchElement => write!(f, "iterator has no more tuples"),
            ExecutionError::IllegalState(msg) => write!(f, "illegal state: {msg}"),
            ExecutionError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            ExecutionError::FieldMismatch(msg) => write!(f, "field mismatch: {msg}"),
        }
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutionError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for ExecutionError {
    fn from(err: StorageError) -> Self {
        ExecutionError::Storage(err)
    }
}
