//! The per-process transaction manager.
//!
//! A `TxnManager` binds one transaction region, the collaborators it was
//! opened with and the chain of handles begun through it. Clones share all of
//! that, so any thread holding a clone sees the same region.
//!
//! Lock order: a handle's state lock may be held while taking the region
//! mutex, never the reverse. The thread-chain lock is never taken while the
//! region mutex is held, and neither is any log facility call.

use std::fmt;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::core::errors::TxnError;
use crate::core::lock_stats::{LockHoldGuard, LockStatKind, LockStats, LockStatsSnapshot};
use crate::facility::Facilities;
use crate::log::{FileLog, LogFacility, Lsn};
use crate::region::{Corruption, LockType, LogType, Region, RegionHeader};

use super::config::ManagerConfig;
use super::detail::TxnDetail;
use super::handle::{HandleState, Txn, TxnInner};
use super::recovery::{RecoverySummary, RecoveryTxnTable};
use super::stats::TxnStats;
use super::{TxnFlags, TxnId, TxnStatus};

pub(crate) struct RegionGuard<'a> {
    guard: MutexGuard<'a, Region>,
    _hold: LockHoldGuard<'a>,
}

impl Deref for RegionGuard<'_> {
    type Target = Region;

    fn deref(&self) -> &Region {
        &self.guard
    }
}

impl DerefMut for RegionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Region {
        &mut self.guard
    }
}

pub(crate) struct ManagerShared {
    path: PathBuf,
    pub(crate) config: ManagerConfig,
    pub(crate) facilities: Facilities,
    region: Mutex<Region>,
    chain: Mutex<Vec<Arc<TxnInner>>>,
    pub(crate) checkpoint_lock: Mutex<()>,
    pub(crate) lock_stats: LockStats,
    panicked: AtomicBool,
    panic_reason: Mutex<Option<String>>,
    recovery: RecoverySummary,
}

impl ManagerShared {
    #[cfg(test)]
    pub(crate) fn region_is_locked(&self) -> bool {
        self.region.is_locked()
    }

    pub(crate) fn lock_region(&self) -> RegionGuard<'_> {
        let wait_start = Instant::now();
        let guard = self.region.lock();
        self.lock_stats
            .record_wait(LockStatKind::Region, wait_start.elapsed());
        RegionGuard {
            guard,
            _hold: self.lock_stats.begin_hold(LockStatKind::Region),
        }
    }

    fn lock_chain(&self) -> MutexGuard<'_, Vec<Arc<TxnInner>>> {
        let wait_start = Instant::now();
        let guard = self.chain.lock();
        self.lock_stats
            .record_wait(LockStatKind::ThreadChain, wait_start.elapsed());
        guard
    }

    pub(crate) fn log(&self) -> Option<&Arc<dyn LogFacility>> {
        self.facilities.log.as_ref()
    }

    pub(crate) fn check_panic(&self) -> Result<(), TxnError> {
        if self.panicked.load(Ordering::Acquire) {
            let reason = self
                .panic_reason
                .lock()
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            return Err(TxnError::ManagerPanicked(reason));
        }
        Ok(())
    }

    pub(crate) fn set_panic(&self, reason: String) -> TxnError {
        {
            let mut slot = self.panic_reason.lock();
            if slot.is_none() {
                error!(path = %self.path.display(), %reason, "transaction manager panicked");
                *slot = Some(reason.clone());
            }
        }
        self.panicked.store(true, Ordering::Release);
        TxnError::ManagerPanicked(reason)
    }

    pub(crate) fn corrupt(&self, corruption: Corruption) -> TxnError {
        self.set_panic(corruption.0)
    }

    pub(crate) fn chain_remove(&self, inners: &[Arc<TxnInner>]) {
        if inners.is_empty() {
            return;
        }
        let mut chain = self.lock_chain();
        let _hold = self.lock_stats.begin_hold(LockStatKind::ThreadChain);
        chain.retain(|entry| !inners.iter().any(|gone| Arc::ptr_eq(entry, gone)));
    }
}

#[derive(Clone)]
pub struct TxnManager {
    pub(crate) shared: Arc<ManagerShared>,
}

impl fmt::Debug for TxnManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnManager")
            .field("path", &self.shared.path)
            .field("config", &self.shared.config)
            .field("facilities", &self.shared.facilities)
            .field("panicked", &self.is_panicked())
            .finish()
    }
}

impl TxnManager {
    /// Opens (creating if needed) a manager rooted at `path` with no lock,
    /// cache or recovery collaborators.
    pub fn open<P: AsRef<Path>>(path: P, config: ManagerConfig) -> Result<Self, TxnError> {
        Self::open_with_facilities(path, config, Facilities::default())
    }

    pub fn open_with_facilities<P: AsRef<Path>>(
        path: P,
        config: ManagerConfig,
        mut facilities: Facilities,
    ) -> Result<Self, TxnError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let log_type = match (&facilities.log, config.logging) {
            (Some(_), _) => LogType::External,
            (None, true) => {
                facilities.log = Some(Arc::new(FileLog::open_or_create(&path)?));
                LogType::File
            }
            (None, false) => LogType::None,
        };
        let lock_type = if facilities.locks.is_some() {
            LockType::External
        } else {
            LockType::None
        };

        let mut header = RegionHeader::new(config.max_transactions, log_type, lock_type);
        let recovery = match &facilities.log {
            Some(log) => {
                let summary = RecoveryTxnTable::scan(log.as_ref())?.summary();
                header.last_txn_id = summary.max_txn_id;
                header.last_ckp = summary.last_ckp;
                header.time_ckp = summary.time_ckp;
                if summary.records > 0 {
                    info!(
                        records = summary.records,
                        max_txn_id = summary.max_txn_id,
                        committed = summary.committed,
                        incomplete = summary.incomplete,
                        prepared = summary.prepared.len(),
                        last_ckp = %summary.last_ckp,
                        "restored transaction state from log"
                    );
                }
                summary
            }
            None => RecoverySummary::default(),
        };

        let region = Region::new(header, config.max_region_transactions);
        let lock_stats = LockStats::new(config.lock_stats_enabled);

        Ok(Self {
            shared: Arc::new(ManagerShared {
                path,
                config,
                facilities,
                region: Mutex::new(region),
                chain: Mutex::new(Vec::new()),
                checkpoint_lock: Mutex::new(()),
                lock_stats,
                panicked: AtomicBool::new(false),
                panic_reason: Mutex::new(None),
                recovery,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// What the log scan at open found.
    pub fn recovery_summary(&self) -> &RecoverySummary {
        &self.shared.recovery
    }

    pub fn begin(&self, parent: Option<&Txn>) -> Result<Txn, TxnError> {
        self.begin_with_flags(parent, TxnFlags::default())
    }

    pub fn begin_with_flags(&self, parent: Option<&Txn>, flags: TxnFlags) -> Result<Txn, TxnError> {
        let shared = &self.shared;
        shared.check_panic()?;

        let parent_inner = match parent {
            Some(parent) => {
                if !Arc::ptr_eq(&parent.inner.manager, shared) {
                    return Err(TxnError::InvalidState(format!(
                        "parent transaction {} belongs to another manager",
                        parent.id()
                    )));
                }
                Some(parent.inner.clone())
            }
            None => None,
        };

        // Hold the parent's state so it cannot resolve while the child joins.
        let mut parent_state = parent_inner.as_ref().map(|p| p.state.lock());
        if let (Some(parent), Some(state)) = (&parent_inner, &parent_state) {
            if state.status != TxnStatus::Running {
                return Err(TxnError::InvalidState(format!(
                    "cannot begin a child of transaction {} in state {:?}",
                    parent.id, state.status
                )));
            }
        }

        // Read before the region mutex; an earlier LSN only makes a
        // checkpoint more conservative.
        let begin_lsn = shared
            .log()
            .map(|log| log.current_lsn())
            .unwrap_or_default();
        let (id, offset) = {
            let mut region = shared.lock_region();
            let id = match region.peek_next_txn_id() {
                Ok(id) => id,
                Err(err) => {
                    drop(region);
                    shared.set_panic("transaction id space exhausted".to_string());
                    return Err(err);
                }
            };
            let parent_offset = parent_inner.as_ref().map(|p| p.offset);
            let offset = region.allocate_detail(TxnDetail::new(id, begin_lsn, parent_offset))?;
            region.header.last_txn_id = id;
            if let Err(corruption) = region.link_active(offset) {
                drop(region);
                return Err(shared.corrupt(corruption));
            }
            region.header.begins += 1;
            (id, offset)
        };

        let inner = Arc::new(TxnInner {
            id,
            offset,
            parent_id: parent_inner.as_ref().map(|p| p.id),
            begin_lsn,
            flags,
            manager: shared.clone(),
            state: Mutex::new(HandleState::new()),
        });

        if let Some(state) = parent_state.as_mut() {
            state.children.push(inner.clone());
        }
        drop(parent_state);

        {
            let mut chain = shared.lock_chain();
            let _hold = shared.lock_stats.begin_hold(LockStatKind::ThreadChain);
            chain.push(inner.clone());
        }

        Ok(Txn { inner })
    }

    pub fn stats(&self) -> Result<TxnStats, TxnError> {
        self.shared.check_panic()?;
        let locks = self.shared.lock_stats.snapshot();
        let region = self.shared.lock_region();
        Ok(TxnStats::collect(&region, locks))
    }

    /// Ids of the handles this process still has open, oldest first.
    pub fn open_txn_ids(&self) -> Vec<TxnId> {
        self.shared.lock_chain().iter().map(|inner| inner.id).collect()
    }

    /// Marks the manager unusable. Every later call through it, or through
    /// any of its handles, fails with `ManagerPanicked`.
    pub fn panic(&self, reason: impl Into<String>) {
        self.shared.set_panic(reason.into());
    }

    pub fn is_panicked(&self) -> bool {
        self.shared.panicked.load(Ordering::Acquire)
    }

    /// Aborts every top-level transaction this process left open, then
    /// flushes the log. Prepared transactions are left for the coordinator.
    pub fn close(&self) -> Result<(), TxnError> {
        self.shared.check_panic()?;

        let open: Vec<Arc<TxnInner>> = self
            .shared
            .lock_chain()
            .iter()
            .filter(|inner| inner.parent_id.is_none())
            .cloned()
            .collect();

        let mut first_error = None;
        for inner in open {
            let txn = Txn { inner };
            if txn.status() != TxnStatus::Running {
                continue;
            }
            if let Err(err) = txn.abort() {
                warn!(txn_id = txn.id(), error = %err, "failed to abort transaction on close");
                first_error.get_or_insert(err);
            }
        }

        if let Some(log) = self.shared.log() {
            log.flush(Lsn::ZERO)?;
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait and hold totals for the region, thread-chain and checkpoint
    /// locks. All zero unless accounting is enabled.
    pub fn lock_stats(&self) -> LockStatsSnapshot {
        self.shared.lock_stats.snapshot()
    }

    /// Turns lock accounting on or off without reopening the manager.
    pub fn set_lock_stats_enabled(&self, enabled: bool) {
        self.shared.lock_stats.set_enabled(enabled);
    }

    pub fn reset_lock_stats(&self) {
        self.shared.lock_stats.reset();
    }

    pub(crate) fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
