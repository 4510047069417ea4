use std::fmt;

use strata::DbError;

/// The operator-layer error. `TransactionAborted` is kept distinguishable
/// from other storage failures: it always means the caller must run the
/// abort path (`Db::transaction_complete(tid, false)`).
#[derive(Debug)]
pub enum ExecutionError {
    Storage(DbError),
    TransactionAborted,
    FieldNotFound(String),
    IteratorNotOpen,
    TypeMismatch(String),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Storage(e) => write!(f, "storage error: {}", e),
            ExecutionError::TransactionAborted => write!(f, "transaction aborted"),
            ExecutionError::FieldNotFound(name) => write!(f, "no field named {}", name),
            ExecutionError::IteratorNotOpen => {
                write!(f, "operator used before open or after close")
            }
            ExecutionError::TypeMismatch(msg) => write!(f, "type mismatch: {}", msg),
        }
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutionError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for ExecutionError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::TransactionAborted(_) => ExecutionError::TransactionAborted,
            other => ExecutionError::Storage(other),
        }
    }
}
