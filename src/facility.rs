//! Collaborators the transaction manager coordinates with but does not
//! implement: the lock manager, the page cache and the recovery dispatcher.

use std::fmt;
use std::sync::Arc;

use crate::core::errors::{LockError, TxnError};
use crate::log::{LogFacility, LogRecord, Lsn};
use crate::txn::TxnId;

/// How a finishing transaction gives up its locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRelease {
    ReleaseAll,
    /// Hand every lock to the parent locker instead of dropping it.
    InheritToParent(TxnId),
}

pub trait LockFacility: Send + Sync {
    fn release_all(&self, txn_id: TxnId, mode: LockRelease) -> Result<(), LockError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    Complete,
    /// Some dirty pages could not be written yet; try again later.
    Incomplete,
}

pub trait CacheFacility: Send + Sync {
    /// Writes every page whose LSN is below `lsn`.
    fn sync_up_to(&self, lsn: Lsn) -> Result<SyncResult, TxnError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOp {
    Undo,
    Redo,
}

pub trait RecoveryDispatcher: Send + Sync {
    /// Applies one record and returns the LSN of the transaction's previous
    /// record, `Lsn::ZERO` when there is none.
    fn apply(&self, record: &LogRecord, op: RecoveryOp, lsn: Lsn) -> Result<Lsn, TxnError>;
}

/// The set of collaborators a manager is opened with. Any of them may be
/// absent: without a log, transactions are read-only-capable with no log
/// overhead; without locks or a cache, the corresponding steps are skipped.
#[derive(Clone, Default)]
pub struct Facilities {
    pub log: Option<Arc<dyn LogFacility>>,
    pub locks: Option<Arc<dyn LockFacility>>,
    pub cache: Option<Arc<dyn CacheFacility>>,
    pub recovery: Option<Arc<dyn RecoveryDispatcher>>,
}

impl Facilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(mut self, log: Arc<dyn LogFacility>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn locks(mut self, locks: Arc<dyn LockFacility>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheFacility>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn recovery(mut self, recovery: Arc<dyn RecoveryDispatcher>) -> Self {
        self.recovery = Some(recovery);
        self
    }
}

impl fmt::Debug for Facilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facilities")
            .field("log", &self.log.is_some())
            .field("locks", &self.locks.is_some())
            .field("cache", &self.cache.is_some())
            .field("recovery", &self.recovery.is_some())
            .finish()
    }
}
