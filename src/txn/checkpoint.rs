use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::core::errors::TxnError;
use crate::core::lock_stats::LockStatKind;
use crate::facility::SyncResult;
use crate::log::{Lsn, TxnRecord};

use super::manager::TxnManager;
use super::TXN_NONE;

/// What a call to [`TxnManager::checkpoint`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckpointOutcome {
    /// Nothing to do: no log is configured, or neither threshold was reached.
    Skipped,
    /// The cache could not write everything below this LSN yet. The next
    /// call resumes from the same LSN.
    Deferred(Lsn),
    Written { ckp_lsn: Lsn, record_lsn: Lsn },
}

impl TxnManager {
    /// Takes a checkpoint.
    ///
    /// `kbytes` and `minutes` rate-limit the call: when either is non-zero,
    /// the checkpoint only runs once that many kilobytes of log were written
    /// or that many minutes passed since the last one. Pass zero for both to
    /// force it.
    pub fn checkpoint(&self, kbytes: u32, minutes: u32) -> Result<CheckpointOutcome, TxnError> {
        let shared = &self.shared;
        shared.check_panic()?;
        let Some(log) = shared.log() else {
            return Ok(CheckpointOutcome::Skipped);
        };

        let wait_start = Instant::now();
        let _serial = shared.checkpoint_lock.lock();
        shared
            .lock_stats
            .record_wait(LockStatKind::Checkpoint, wait_start.elapsed());
        let _hold = shared.lock_stats.begin_hold(LockStatKind::Checkpoint);

        let (pending, last_ckp, time_ckp) = {
            let region = shared.lock_region();
            (
                region.header.pending_ckp,
                region.header.last_ckp,
                region.header.time_ckp,
            )
        };

        if pending.is_zero() && (kbytes != 0 || minutes != 0) {
            let written = log.bytes_since(last_ckp);
            let elapsed = Self::now_secs().saturating_sub(time_ckp);
            let size_due = kbytes != 0 && written >= u64::from(kbytes) * 1024;
            let time_due = minutes != 0 && elapsed >= u64::from(minutes) * 60;
            if !size_due && !time_due {
                debug!(written, elapsed, "checkpoint thresholds not reached");
                return Ok(CheckpointOutcome::Skipped);
            }
        }

        let current = log.current_lsn();
        let ckp_lsn = {
            let mut region = shared.lock_region();
            if region.header.pending_ckp.is_zero() {
                let oldest = region
                    .active()
                    .map(|(_, detail)| detail.begin_lsn)
                    .filter(|lsn| !lsn.is_zero())
                    .fold(current, |min, lsn| {
                        if log.compare(lsn, min).is_lt() {
                            lsn
                        } else {
                            min
                        }
                    });
                region.header.pending_ckp = oldest;
            }
            region.header.pending_ckp
        };

        if let Some(cache) = &shared.facilities.cache {
            if cache.sync_up_to(ckp_lsn)? == SyncResult::Incomplete {
                debug!(%ckp_lsn, "cache sync incomplete, checkpoint deferred");
                return Ok(CheckpointOutcome::Deferred(ckp_lsn));
            }
        }

        let timestamp = Self::now_secs();
        let record = TxnRecord::Checkpoint {
            ckp_lsn,
            last_ckp,
            timestamp,
        };
        let record_lsn = log.append(&record.to_log_record(TXN_NONE, Lsn::ZERO)?.encode()?)?;
        log.flush(record_lsn)?;

        {
            let mut region = shared.lock_region();
            if log.compare(ckp_lsn, region.header.last_ckp).is_ge() {
                region.header.last_ckp = ckp_lsn;
            }
            region.header.time_ckp = timestamp;
            region.header.pending_ckp = Lsn::ZERO;
        }

        info!(%ckp_lsn, %record_lsn, "checkpoint written");
        Ok(CheckpointOutcome::Written {
            ckp_lsn,
            record_lsn,
        })
    }
}
