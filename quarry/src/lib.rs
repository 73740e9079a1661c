//! # Quarry Query Execution
//! The query execution layer of QuarryDB: a pull-based pipeline of
//! relational operators over the `stratum` storage engine. Every operator
//! speaks the [`OpIterator`](executor::OpIterator) contract; trees of
//! boxed operators are built by hand (there is no SQL front end here)
//! and driven by one thread per transaction.

pub mod aggregate_executor;
pub mod errors;
pub mod executor;

pub use aggregate_executor::{Aggregate, AggregateOp, Aggregator, IntAggregator, StrAggregator};
pub use errors::ExecutionError;
pub use executor::{BoxedOp, OpIterator};
