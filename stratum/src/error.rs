use std::fmt;
use std::io;

use crate::page::PageId;

/// Every way the storage engine can fail.
///
/// `TransactionAborted` is the only recoverable variant: it is raised by a
/// lock-acquisition timeout and the caller is expected to answer it with
/// `BufferPool::transaction_complete(tid, false)`.
#[derive(Debug)]
pub enum StorageError {
    /// A page latch could not be acquired before the randomized timeout.
    TransactionAborted,
    /// A page index past the end of its heap file.
    InvalidPage(PageId),
    /// A page with no free tuple slot.
    PageFull(PageId),
    /// A page buffer that does not deserialize under the current schema.
    PageCorrupt(String),
    /// A tuple whose schema does not match the table it is aimed at.
    SchemaMismatch(String),
    /// Eviction was required but every cached page is dirty.
    BufferFull,
    /// A catalog lookup miss.
    NoSuchTable(String),
    /// A delete aimed at a slot that holds no tuple.
    NoSuchTuple(String),
    /// A malformed schema file.
    InvalidCatalog(String),
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::TransactionAborted => write!(f, "transaction aborted by lock timeout"),
            StorageError::InvalidPage(pid) => write!(f, "page {pid} is out of bounds"),
            StorageError::PageFull(pid) => write!(f, "page {pid} has no free slot"),
            StorageError::PageCorrupt(msg) => write!(f, "corrupt page: {msg}"),
            StorageError::SchemaMismatch(msg) => write!(f, "schema mismatch: {msg}"),
            StorageError::BufferFull => write!(f, "all pages in the buffer pool are dirty"),
            StorageError::NoSuchTable(name) => write!(f, "no such table: {name}"),
            StorageError::NoSuchTuple(msg) => write!(f, "no such tuple: {msg}"),
            StorageError::InvalidCatalog(msg) => write!(f, "invalid catalog entry: {msg}"),
            StorageError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
