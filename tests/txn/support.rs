use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use wrongotxn::{
    CacheFacility, Facilities, LockError, LockFacility, LockRelease, LogRecord, Lsn, ManagerConfig, MemoryLog,
    RecoveryDispatcher, RecoveryOp, SyncResult, TxnError, TxnId, TxnManager,
};

#[derive(Default)]
pub struct MockLocks {
    pub releases: Mutex<Vec<(TxnId, LockRelease)>>,
    failing: Mutex<Vec<(TxnId, LockError)>>,
}

impl MockLocks {
    pub fn fail_for(&self, txn_id: TxnId, err: LockError) {
        self.failing.lock().push((txn_id, err));
    }

    pub fn released(&self) -> Vec<(TxnId, LockRelease)> {
        self.releases.lock().clone()
    }
}

impl LockFacility for MockLocks {
    fn release_all(&self, txn_id: TxnId, mode: LockRelease) -> Result<(), LockError> {
        self.releases.lock().push((txn_id, mode));
        match self.failing.lock().iter().find(|(id, _)| *id == txn_id) {
            Some((_, err)) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Answers `sync_up_to` from a script, then `Complete` once it runs dry.
#[derive(Default)]
pub struct ScriptedCache {
    script: Mutex<VecDeque<SyncResult>>,
    pub requests: Mutex<Vec<Lsn>>,
}

impl ScriptedCache {
    pub fn push(&self, result: SyncResult) {
        self.script.lock().push_back(result);
    }
}

impl CacheFacility for ScriptedCache {
    fn sync_up_to(&self, lsn: Lsn) -> Result<SyncResult, TxnError> {
        self.requests.lock().push(lsn);
        Ok(self.script.lock().pop_front().unwrap_or(SyncResult::Complete))
    }
}

#[derive(Default)]
pub struct UndoRecorder {
    pub applied: Mutex<Vec<(TxnId, Lsn)>>,
    failing: Mutex<HashSet<Lsn>>,
}

impl UndoRecorder {
    pub fn fail_at(&self, lsn: Lsn) {
        self.failing.lock().insert(lsn);
    }

    pub fn applied(&self) -> Vec<(TxnId, Lsn)> {
        self.applied.lock().clone()
    }
}

impl RecoveryDispatcher for UndoRecorder {
    fn apply(&self, record: &LogRecord, op: RecoveryOp, lsn: Lsn) -> Result<Lsn, TxnError> {
        assert_eq!(op, RecoveryOp::Undo);
        if self.failing.lock().contains(&lsn) {
            return Err(TxnError::InvalidState(format!("page for {lsn} is unreadable")));
        }
        self.applied.lock().push((record.header.txn_id, lsn));
        Ok(record.header.prev_lsn)
    }
}

pub struct Env {
    pub manager: TxnManager,
    pub log: Arc<MemoryLog>,
    pub locks: Arc<MockLocks>,
    pub cache: Arc<ScriptedCache>,
    pub undo: Arc<UndoRecorder>,
}

pub fn memory_env(dir: &Path, config: ManagerConfig) -> Env {
    let log = Arc::new(MemoryLog::new());
    let locks = Arc::new(MockLocks::default());
    let cache = Arc::new(ScriptedCache::default());
    let undo = Arc::new(UndoRecorder::default());
    let facilities = Facilities::new()
        .log(log.clone())
        .locks(locks.clone())
        .cache(cache.clone())
        .recovery(undo.clone());
    let manager = TxnManager::open_with_facilities(dir, config, facilities).unwrap();
    Env {
        manager,
        log,
        locks,
        cache,
        undo,
    }
}
