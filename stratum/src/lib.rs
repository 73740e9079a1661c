//! # Stratum Storage Engine
//! The storage engine for QuarryDB. This crate owns the on-disk and
//! in-memory representation of data: fixed-size pages in heap files, the
//! bounded buffer pool that caches them, and the per-page transaction
//! latches that enforce strict two-phase locking.

use std::sync::atomic::{AtomicUsize, Ordering};

/// The bounded page cache and its commit/abort page lifecycle.
pub mod buffer_pool;
/// Table name/id resolution and the schema-file loader.
pub mod catalog;
/// Error types shared across the crate.
pub mod error;
/// The heap file page manager.
pub mod heap_file;
/// Per-page reader/writer locks keyed by transaction identity.
pub mod latch;
/// The slotted page layout.
pub mod page;
/// Field types and tuple schemas.
pub mod schema;
/// Transaction identifiers.
pub mod transaction;
/// Tuples, fields and record identifiers.
pub mod tuple;

pub use buffer_pool::{BufferPool, PageHandle};
pub use catalog::Catalog;
pub use error::StorageError;
pub use heap_file::{HeapFile, HeapFileIterator};
pub use latch::{LockMode, PageLatch, Permissions};
pub use page::{HeapPage, PageId};
pub use schema::{CmpOp, FieldType, TupleDesc, TEXT_LEN};
pub use transaction::TransactionId;
pub use tuple::{Field, RecordId, Tuple};

/// The size of a single page in bytes unless overridden for tests.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// The process-wide page size. Every heap file and every cached page in
/// the process uses this value.
pub fn page_size() -> usize {
    PAGE_SIZE.load(Ordering::Relaxed)
}

/// Overrides the process-wide page size. Tests only; pages written under
/// one size are unreadable under another.
#[cfg(any(test, feature = "test-util"))]
pub fn set_page_size(bytes: usize) {
    PAGE_SIZE.store(bytes, Ordering::Relaxed);
}

/// Restores [`DEFAULT_PAGE_SIZE`]. Tests only.
#[cfg(any(test, feature = "test-util"))]
pub fn reset_page_size() {
    PAGE_SIZE.store(DEFAULT_PAGE_SIZE, Ordering::Relaxed);
}
