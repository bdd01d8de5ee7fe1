mod core;
pub mod facility;
pub mod log;
pub mod region;
pub mod txn;

pub use crate::core::errors::{LockError, StorageError, TxnError};
pub use crate::core::lock_stats::{LockCounterSnapshot, LockStatsSnapshot};
pub use crate::facility::{
    CacheFacility, Facilities, LockFacility, LockRelease, RecoveryDispatcher, RecoveryOp, SyncResult,
};
pub use crate::log::{FileLog, LogFacility, LogRecord, Lsn, MemoryLog, TxnRecord, REC_TYPE_USER_MIN};
pub use crate::txn::checkpoint::CheckpointOutcome;
pub use crate::txn::{
    ManagerConfig, RecoverySummary, Txn, TxnFlags, TxnId, TxnManager, TxnStats, TxnStatus, Xid, TXN_INVALID,
    TXN_NONE,
};
