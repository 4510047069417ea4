//! Error types for the storage engine.

use std::fmt;
use std::io;

use crate::page::PageId;
use crate::transaction::TransactionId;

/// The storage-layer error. `TransactionAborted` is the one variant with a
/// prescribed recovery: the caller must run the abort path
/// (`Db::transaction_complete(tid, false)`).
#[derive(Debug)]
pub enum DbError {
    Io(io::Error),
    /// Deadlock or forced abort.
    TransactionAborted(TransactionId),
    /// Insert attempted on a page with no empty slots.
    PageFull(PageId),
    /// The tuple is not on the page its RecordId names.
    TupleNotFound,
    /// No table registered under the given id or name.
    NoSuchTable(String),
    /// Every cached page is dirty; nothing can be evicted (no-steal).
    BufferPoolFull,
    /// Malformed argument: bad page category, field index, type mismatch.
    InvalidArgument(String),
    /// On-disk bytes that do not parse as the expected page shape.
    Corrupt(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Io(e) => write!(f, "io error: {}", e),
            DbError::TransactionAborted(tid) => {
                write!(f, "transaction {} aborted", tid)
            }
            DbError::PageFull(pid) => write!(f, "page {:?} has no empty slots", pid),
            DbError::TupleNotFound => write!(f, "tuple not found on its page"),
            DbError::NoSuchTable(name) => write!(f, "no such table: {}", name),
            DbError::BufferPoolFull => write!(f, "buffer pool full of dirty pages"),
            DbError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            DbError::Corrupt(msg) => write!(f, "corrupt page data: {}", msg),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DbError {
    fn from(err: io::Error) -> Self {
        DbError::Io(err)
    }
}
