//! The operator iterator contract and the operator library.

use std::sync::Arc;

use stratum::{Tuple, TupleDesc};

use crate::errors::ExecutionError;

mod dml;
mod join;
mod pipeline;
mod scan;

pub use dml::{Delete, Insert};
pub use join::{Join, JoinPredicate};
pub use pipeline::{Filter, Predicate, Project};
pub use scan::SeqScan;

pub type BoxedOp = Box<dyn OpIterator>;

/// The contract every relational operator honors.
///
/// An operator starts closed. `open` positions it before its first
/// tuple; `has_next` is idempotent and never consumes; `next` yields
/// exactly one tuple and raises [`ExecutionError::NoSuchElement`] at the
/// end; `rewind` is observationally `close` followed by `open`; calling
/// `has_next` or `next` on a closed operator is an
/// [`ExecutionError::IllegalState`]. `schema` is available at any time.
pub trait OpIterator {
    fn open(&mut self) -> Result<(), ExecutionError>;

    fn close(&mut self);

    fn rewind(&mut self) -> Result<(), ExecutionError>;

    fn has_next(&mut self) -> Result<bool, ExecutionError>;

    fn next(&mut self) -> Result<Tuple, ExecutionError>;

    fn schema(&self) -> &Arc<TupleDesc>;

    /// The operator's inputs, leaves returning none.
    fn children(&mut self) -> Vec<&mut BoxedOp>;

    /// Replaces the operator's inputs; the arity must match.
    fn set_children(&mut self, children: Vec<BoxedOp>) -> Result<(), ExecutionError>;
}

pub(crate) fn not_open() -> ExecutionError {
    ExecutionError::IllegalState("operator is not open".to_string())
}

pub(crate) fn wrong_child_count(expected: usize, got: usize) -> ExecutionError {
    ExecutionError::IllegalState(format!("operator takes {expected} children, got {got}"))
}
