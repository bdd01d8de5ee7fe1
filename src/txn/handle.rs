//! Caller-facing transaction handles: begin-time identity plus the commit,
//! abort and prepare paths.
//!
//! A handle is process-local. Its shared counterpart is the `TxnDetail` at
//! `offset` in the region; the handle is the only party that mutates it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::errors::TxnError;
use crate::facility::{LockRelease, RecoveryOp};
use crate::log::{LogRecord, Lsn, TxnRecord, REC_TYPE_USER_MIN};
use crate::region::{Corruption, Region, RegionOffset};

use super::detail::TxnDetail;
use super::manager::{ManagerShared, TxnManager};
use super::{TxnFlags, TxnId, TxnStatus, Xid};

pub(crate) struct HandleState {
    pub(crate) status: TxnStatus,
    /// Cached copy of the detail's `last_lsn`; the head of the undo chain.
    pub(crate) last_lsn: Lsn,
    pub(crate) xid: Option<Xid>,
    /// Children in begin order. Committed children stay here until this
    /// transaction resolves.
    pub(crate) children: Vec<Arc<TxnInner>>,
}

impl HandleState {
    pub(crate) fn new() -> Self {
        Self {
            status: TxnStatus::Running,
            last_lsn: Lsn::ZERO,
            xid: None,
            children: Vec::new(),
        }
    }
}

pub(crate) struct TxnInner {
    pub(crate) id: TxnId,
    pub(crate) offset: RegionOffset,
    pub(crate) parent_id: Option<TxnId>,
    pub(crate) begin_lsn: Lsn,
    pub(crate) flags: TxnFlags,
    pub(crate) manager: Arc<ManagerShared>,
    pub(crate) state: Mutex<HandleState>,
}

/// A transaction begun through [`TxnManager::begin`].
///
/// Resolve it with exactly one of [`commit`](Txn::commit) or
/// [`abort`](Txn::abort); after that every operation returns `InvalidState`.
pub struct Txn {
    pub(crate) inner: Arc<TxnInner>,
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Txn")
            .field("id", &self.inner.id)
            .field("parent_id", &self.inner.parent_id)
            .field("status", &state.status)
            .field("begin_lsn", &self.inner.begin_lsn)
            .field("last_lsn", &state.last_lsn)
            .field("children", &state.children.len())
            .finish()
    }
}

impl Txn {
    pub fn id(&self) -> TxnId {
        self.inner.id
    }

    pub fn parent_id(&self) -> Option<TxnId> {
        self.inner.parent_id
    }

    pub fn begin_lsn(&self) -> Lsn {
        self.inner.begin_lsn
    }

    pub fn last_lsn(&self) -> Lsn {
        self.inner.state.lock().last_lsn
    }

    pub fn status(&self) -> TxnStatus {
        self.inner.state.lock().status
    }

    pub fn xid(&self) -> Option<Xid> {
        self.inner.state.lock().xid.clone()
    }

    pub fn child_ids(&self) -> Vec<TxnId> {
        self.inner
            .state
            .lock()
            .children
            .iter()
            .map(|child| child.id)
            .collect()
    }

    pub fn manager(&self) -> TxnManager {
        TxnManager {
            shared: self.inner.manager.clone(),
        }
    }

    /// Appends a record on behalf of this transaction and links it into the
    /// transaction's undo chain.
    pub fn log_record(&self, rec_type: u32, body: &[u8]) -> Result<Lsn, TxnError> {
        if rec_type < REC_TYPE_USER_MIN {
            return Err(TxnError::InvalidState(format!(
                "record type {rec_type} is reserved for the transaction manager"
            )));
        }
        let shared = &self.inner.manager;
        shared.check_panic()?;
        let mut state = self.inner.state.lock();
        self.ensure_running(&state, "log a record for")?;
        let log = shared
            .log()
            .ok_or_else(|| TxnError::InvalidState("no log facility configured".into()))?;

        let record = LogRecord::new(rec_type, self.inner.id, state.last_lsn, body.to_vec());
        let lsn = log.append(&record.encode()?)?;
        self.note_lsn(&mut state, lsn)?;
        Ok(lsn)
    }

    /// Records that the caller appended a record for this transaction
    /// directly through the log facility. `lsn` must advance the chain.
    pub fn set_last_lsn(&self, lsn: Lsn) -> Result<(), TxnError> {
        let shared = &self.inner.manager;
        shared.check_panic()?;
        let mut state = self.inner.state.lock();
        self.ensure_running(&state, "log a record for")?;
        if lsn <= state.last_lsn {
            return Err(TxnError::InvalidState(format!(
                "LSN {lsn} does not advance past {}",
                state.last_lsn
            )));
        }
        self.note_lsn(&mut state, lsn)
    }

    fn note_lsn(&self, state: &mut HandleState, lsn: Lsn) -> Result<(), TxnError> {
        let shared = &self.inner.manager;
        let updated = {
            let mut region = shared.lock_region();
            own_detail(&mut region, &self.inner).map(|detail| detail.last_lsn = lsn)
        };
        updated.map_err(|corruption| shared.corrupt(corruption))?;
        state.last_lsn = lsn;
        Ok(())
    }

    fn ensure_running(&self, state: &HandleState, action: &str) -> Result<(), TxnError> {
        if state.status != TxnStatus::Running {
            return Err(TxnError::InvalidState(format!(
                "cannot {action} transaction {} in state {:?}",
                self.inner.id, state.status
            )));
        }
        Ok(())
    }

    /// Commits the transaction.
    ///
    /// A top-level commit forces its commit record to the log (unless
    /// configured `no_sync`), releases its locks and frees the bookkeeping of
    /// every committed descendant. A child commit hands its locks to the
    /// parent and keeps its detail record alive, since the parent can still
    /// abort. Children still running are committed first.
    pub fn commit(&self) -> Result<(), TxnError> {
        let inner = &self.inner;
        let shared = &inner.manager;
        shared.check_panic()?;

        let mut state = inner.state.lock();
        if !state.status.is_resolvable() {
            return Err(TxnError::InvalidState(format!(
                "cannot commit transaction {} in state {:?}",
                inner.id, state.status
            )));
        }

        let unresolved: Vec<Arc<TxnInner>> = descendants_post_order(&state.children)
            .into_iter()
            .filter(|child| child.state.lock().status.is_resolvable())
            .collect();
        for child in unresolved {
            debug!(txn_id = inner.id, child_id = child.id, "committing unresolved child");
            Txn { inner: child }.commit()?;
        }

        let top_level = inner.parent_id.is_none();
        let committed_descendants: Vec<Arc<TxnInner>> = if top_level {
            descendants_post_order(&state.children)
                .into_iter()
                .filter(|child| child.state.lock().status == TxnStatus::Committed)
                .collect()
        } else {
            Vec::new()
        };
        let descendants_logged = committed_descendants
            .iter()
            .any(|child| !child.state.lock().last_lsn.is_zero());

        self.log_commit(&state, descendants_logged)?;

        let mut lock_error = None;
        if let Some(locks) = &shared.facilities.locks {
            for child in &committed_descendants {
                if let Err(source) = locks.release_all(child.id, LockRelease::ReleaseAll) {
                    warn!(txn_id = child.id, error = %source, "failed to release locks of committed child");
                    lock_error.get_or_insert(TxnError::LockReleaseFailed {
                        txn_id: child.id,
                        source,
                    });
                }
            }
            let mode = match inner.parent_id {
                None => LockRelease::ReleaseAll,
                Some(parent_id) => LockRelease::InheritToParent(parent_id),
            };
            if let Err(source) = locks.release_all(inner.id, mode) {
                warn!(txn_id = inner.id, error = %source, "failed to release locks on commit");
                lock_error.get_or_insert(TxnError::LockReleaseFailed {
                    txn_id: inner.id,
                    source,
                });
            }
        }

        let finalized = {
            let mut region = shared.lock_region();
            finalize_commit(&mut region, inner, &committed_descendants)
        };
        finalized.map_err(|corruption| shared.corrupt(corruption))?;

        for child in &committed_descendants {
            child.state.lock().children.clear();
        }
        state.status = TxnStatus::Committed;
        if top_level {
            state.children.clear();
        }
        drop(state);
        shared.chain_remove(std::slice::from_ref(inner));

        match lock_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Writes the commit record. A transaction that logged nothing, and
    /// whose committed descendants logged nothing, needs none.
    fn log_commit(&self, state: &HandleState, descendants_logged: bool) -> Result<(), TxnError> {
        let inner = &self.inner;
        let shared = &inner.manager;
        let Some(log) = shared.log() else {
            return Ok(());
        };
        if state.last_lsn.is_zero() && state.status != TxnStatus::Prepared && !descendants_logged {
            return Ok(());
        }

        let record = match inner.parent_id {
            None => TxnRecord::Commit,
            Some(parent_id) => TxnRecord::ChildCommit { parent_id },
        };
        let lsn = log.append(&record.to_log_record(inner.id, state.last_lsn)?.encode()?)?;

        // A child's commit becomes durable with its top-level ancestor's.
        let sync = inner.parent_id.is_none() && !shared.config.no_sync && !inner.flags.no_sync;
        if sync {
            log.flush(lsn)?;
        }
        Ok(())
    }

    /// Aborts the transaction and, first, every descendant, including
    /// children that already committed.
    pub fn abort(&self) -> Result<(), TxnError> {
        let inner = &self.inner;
        let shared = &inner.manager;
        shared.check_panic()?;

        let mut state = inner.state.lock();
        if !state.status.is_resolvable() {
            return Err(TxnError::InvalidState(format!(
                "cannot abort transaction {} in state {:?}",
                inner.id, state.status
            )));
        }

        for child in descendants_post_order(&state.children) {
            let mut child_state = child.state.lock();
            abort_one(&child, &mut child_state)?;
        }
        abort_one(inner, &mut state)
    }

    /// First phase of two-phase commit: durably records `xid` and moves the
    /// transaction to `Prepared`. Locks are kept; commit or abort must follow.
    pub fn prepare(&self, xid: Xid) -> Result<(), TxnError> {
        let inner = &self.inner;
        let shared = &inner.manager;
        shared.check_panic()?;

        let mut state = inner.state.lock();
        self.ensure_running(&state, "prepare")?;
        if inner.parent_id.is_some() {
            return Err(TxnError::InvalidState(format!(
                "transaction {} is a child; only top-level transactions can be prepared",
                inner.id
            )));
        }
        let unresolved = state
            .children
            .iter()
            .any(|child| child.state.lock().status.is_resolvable());
        if unresolved {
            return Err(TxnError::InvalidState(format!(
                "transaction {} has unresolved children",
                inner.id
            )));
        }
        let log = shared
            .log()
            .ok_or_else(|| TxnError::InvalidState("prepare requires a log facility".into()))?;

        let record = TxnRecord::Prepare { xid: xid.clone() };
        let lsn = log.append(&record.to_log_record(inner.id, state.last_lsn)?.encode()?)?;
        log.flush(lsn)?;

        let updated = {
            let mut region = shared.lock_region();
            own_detail(&mut region, inner).map(|detail| {
                detail.status = TxnStatus::Prepared;
                detail.xid = Some(xid.clone());
            })
        };
        updated.map_err(|corruption| shared.corrupt(corruption))?;

        state.status = TxnStatus::Prepared;
        state.xid = Some(xid);
        Ok(())
    }
}

/// Every descendant reachable from `children`, deepest first. Iterative so
/// nesting depth cannot exhaust the stack.
fn descendants_post_order(children: &[Arc<TxnInner>]) -> Vec<Arc<TxnInner>> {
    let mut out = Vec::new();
    let mut stack: Vec<(Arc<TxnInner>, bool)> =
        children.iter().rev().map(|child| (child.clone(), false)).collect();

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            out.push(node);
            continue;
        }
        let grandchildren = node.state.lock().children.clone();
        stack.push((node, true));
        for child in grandchildren.into_iter().rev() {
            stack.push((child, false));
        }
    }
    out
}

fn own_detail<'r>(region: &'r mut Region, inner: &TxnInner) -> Result<&'r mut TxnDetail, Corruption> {
    match region.detail_mut(inner.offset) {
        Some(detail) if detail.id == inner.id => Ok(detail),
        Some(detail) => Err(Corruption(format!(
            "detail at {} holds transaction {}, expected {}",
            inner.offset, detail.id, inner.id
        ))),
        None => Err(Corruption(format!(
            "transaction {} has no detail at {}",
            inner.id, inner.offset
        ))),
    }
}

fn finalize_commit(
    region: &mut Region,
    inner: &TxnInner,
    committed_descendants: &[Arc<TxnInner>],
) -> Result<(), Corruption> {
    for child in committed_descendants {
        region.remove_detail(child.offset)?;
    }
    if inner.parent_id.is_none() {
        own_detail(region, inner)?;
        region.remove_detail(inner.offset)?;
    } else {
        own_detail(region, inner)?.status = TxnStatus::Committed;
    }
    region.header.commits += 1;
    Ok(())
}

fn finalize_abort(region: &mut Region, inner: &TxnInner) -> Result<(), Corruption> {
    own_detail(region, inner)?;
    region.remove_detail(inner.offset)?;
    region.header.aborts += 1;
    Ok(())
}

fn abort_one(inner: &Arc<TxnInner>, state: &mut HandleState) -> Result<(), TxnError> {
    if state.status == TxnStatus::Aborted {
        return Ok(());
    }
    let shared = &inner.manager;

    undo(shared, inner.id, state.last_lsn)?;

    // The prepare record is durable, so the outcome must be too.
    if state.status == TxnStatus::Prepared {
        if let Some(log) = shared.log() {
            let record = TxnRecord::Abort.to_log_record(inner.id, state.last_lsn)?;
            let lsn = log.append(&record.encode()?)?;
            log.flush(lsn)?;
        }
    }

    if let Some(locks) = &shared.facilities.locks {
        if let Err(err) = locks.release_all(inner.id, LockRelease::ReleaseAll) {
            warn!(txn_id = inner.id, error = %err, "failed to release locks on abort");
        }
    }

    let removed = {
        let mut region = shared.lock_region();
        finalize_abort(&mut region, inner)
    };
    removed.map_err(|corruption| shared.corrupt(corruption))?;

    state.status = TxnStatus::Aborted;
    state.children.clear();
    shared.chain_remove(std::slice::from_ref(inner));
    debug!(txn_id = inner.id, "aborted transaction");
    Ok(())
}

/// Walks the undo chain from `last_lsn` back to the transaction's first
/// record, handing each record to the recovery dispatcher.
fn undo(shared: &ManagerShared, txn_id: TxnId, last_lsn: Lsn) -> Result<(), TxnError> {
    if last_lsn.is_zero() {
        return Ok(());
    }
    let failed = |lsn: Lsn, reason: String| TxnError::UndoFailed {
        txn_id,
        lsn,
        reason,
    };

    let log = shared
        .log()
        .ok_or_else(|| failed(last_lsn, "no log facility configured".into()))?;
    let dispatcher = shared
        .facilities
        .recovery
        .as_ref()
        .ok_or_else(|| failed(last_lsn, "no recovery dispatcher configured".into()))?;

    let mut lsn = last_lsn;
    while !lsn.is_zero() {
        let data = log.read(lsn).map_err(|e| failed(lsn, e.to_string()))?;
        let record = LogRecord::decode(&data).map_err(|e| failed(lsn, e.to_string()))?;
        if record.header.txn_id != txn_id {
            return Err(failed(
                lsn,
                format!("record belongs to transaction {}", record.header.txn_id),
            ));
        }
        let prior = dispatcher
            .apply(&record, RecoveryOp::Undo, lsn)
            .map_err(|e| failed(lsn, e.to_string()))?;
        if !prior.is_zero() && log.compare(prior, lsn) != std::cmp::Ordering::Less {
            return Err(failed(
                lsn,
                format!("undo chain does not move backwards (next {prior})"),
            ));
        }
        lsn = prior;
    }
    Ok(())
}
