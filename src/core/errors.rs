use thiserror::Error;

use crate::log::Lsn;
use crate::txn::TxnId;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("transaction region out of memory: {0}")]
    OutOfMemory(String),

    #[error("transaction id space exhausted; the log and region must be reset")]
    IdSpaceExhausted,

    #[error("invalid transaction state: {0}")]
    InvalidState(String),

    #[error("undo failed for transaction {txn_id} at {lsn}: {reason}")]
    UndoFailed {
        txn_id: TxnId,
        lsn: Lsn,
        reason: String,
    },

    #[error("transaction manager panicked: {0}")]
    ManagerPanicked(String),

    #[error("lock release failed for transaction {txn_id}: {source}")]
    LockReleaseFailed {
        txn_id: TxnId,
        #[source]
        source: LockError,
    },

    #[error("region grow failed: {0}")]
    RegionGrowFailed(String),

    #[error("cache sync failed: {0}")]
    CacheSync(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by a lock facility while releasing a transaction's locks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("deadlock detected")]
    Deadlock,

    #[error("locker {0} holds no locks")]
    NotHeld(TxnId),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct StorageError(pub String);
