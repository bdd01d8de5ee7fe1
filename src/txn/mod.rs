pub mod checkpoint;
pub mod config;
pub mod detail;
pub mod handle;
pub mod manager;
pub mod recovery;
pub mod stats;

use serde::{Deserialize, Serialize};

pub use checkpoint::CheckpointOutcome;
pub use config::ManagerConfig;
pub use detail::TxnDetail;
pub use handle::Txn;
pub use manager::TxnManager;
pub use recovery::{RecoverySummary, RecoveryTxnTable};
pub use stats::{ActiveTxnStat, TxnStats};

pub type TxnId = u32;

/// Id 0 is never handed out; it marks log records written outside any
/// transaction.
pub const TXN_NONE: TxnId = 0;
/// Upper end of the id space. Reaching it requires resetting the log.
pub const TXN_INVALID: TxnId = u32::MAX;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    Running,
    Prepared,
    Committed,
    Aborted,
}

impl TxnStatus {
    pub fn is_resolvable(&self) -> bool {
        matches!(self, TxnStatus::Running | TxnStatus::Prepared)
    }
}

/// Global transaction identifier for two-phase commit, in the shape XA uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    pub format: i32,
    pub gtrid: Vec<u8>,
    pub bqual: Vec<u8>,
}

impl Xid {
    pub fn new(format: i32, gtrid: Vec<u8>, bqual: Vec<u8>) -> Self {
        Self {
            format,
            gtrid,
            bqual,
        }
    }
}

/// Per-transaction options for `TxnManager::begin_with_flags`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnFlags {
    /// Do not force the log when this transaction commits.
    pub no_sync: bool,
}
