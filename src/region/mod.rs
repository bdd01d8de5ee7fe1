//! The transaction region: header, detail records and the active list.
//!
//! Every mutation here happens with the manager's region mutex held. Records
//! refer to each other by [`RegionOffset`] so the region can grow without
//! invalidating anything.

pub mod arena;
pub mod header;

use tracing::info;

use crate::core::errors::TxnError;
use crate::txn::{TxnDetail, TxnId, TXN_INVALID};

pub use arena::{Arena, OutOfSpace, RegionOffset};
pub use header::{LockType, LogType, RegionHeader};

/// An internal invariant does not hold; the region can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corruption(pub String);

#[derive(Debug)]
pub struct Region {
    pub header: RegionHeader,
    details: Arena<TxnDetail>,
    /// Growth never goes past this many detail records.
    max_capacity: usize,
}

impl Region {
    pub fn new(header: RegionHeader, max_capacity: usize) -> Self {
        let capacity = header.max_txns.max(1).min(max_capacity.max(1));
        Self {
            details: Arena::with_capacity(capacity),
            max_capacity: max_capacity.max(capacity),
            header,
        }
    }

    pub fn capacity(&self) -> usize {
        self.details.capacity()
    }

    pub fn live_details(&self) -> usize {
        self.details.len()
    }

    pub fn detail(&self, offset: RegionOffset) -> Option<&TxnDetail> {
        self.details.get(offset)
    }

    pub fn detail_mut(&mut self, offset: RegionOffset) -> Option<&mut TxnDetail> {
        self.details.get_mut(offset)
    }

    /// Id the next `begin` will receive. Never hands out `TXN_INVALID`.
    pub fn peek_next_txn_id(&self) -> Result<TxnId, TxnError> {
        if self.header.last_txn_id >= TXN_INVALID - 1 {
            return Err(TxnError::IdSpaceExhausted);
        }
        Ok(self.header.last_txn_id + 1)
    }

    /// Stores `detail`, growing the region once if it is full.
    pub fn allocate_detail(&mut self, detail: TxnDetail) -> Result<RegionOffset, TxnError> {
        match self.details.allocate(detail) {
            Ok(offset) => Ok(offset),
            Err(OutOfSpace(detail)) => {
                self.grow()?;
                self.details.allocate(detail).map_err(|_| {
                    TxnError::OutOfMemory(format!(
                        "no free transaction slot after growing to {}",
                        self.details.capacity()
                    ))
                })
            }
        }
    }

    /// Doubles the transaction capacity, bounded by the configured maximum.
    pub fn grow(&mut self) -> Result<(), TxnError> {
        let current = self.details.capacity();
        let target = current.saturating_mul(2).max(current + 1).min(self.max_capacity);
        if target <= current {
            return Err(TxnError::RegionGrowFailed(format!(
                "region already holds its maximum of {current} transactions"
            )));
        }
        self.details.grow(target)?;
        self.header.max_txns = target;
        self.header.region_grows += 1;
        info!(from = current, to = target, "grew transaction region");
        Ok(())
    }

    /// Links `offset` at the head of the active list.
    pub fn link_active(&mut self, offset: RegionOffset) -> Result<(), Corruption> {
        let old_head = self.header.active_head;
        if let Some(head) = old_head {
            let head_detail = self
                .details
                .get_mut(head)
                .ok_or_else(|| Corruption(format!("active list head {head} is not allocated")))?;
            head_detail.links.prev = Some(offset);
        }
        let detail = self
            .details
            .get_mut(offset)
            .ok_or_else(|| Corruption(format!("cannot link unallocated detail {offset}")))?;
        detail.links.prev = None;
        detail.links.next = old_head;
        self.header.active_head = Some(offset);

        self.header.nactive += 1;
        self.header.max_active = self.header.max_active.max(self.header.nactive);
        Ok(())
    }

    /// Unlinks `offset` from the active list and frees its storage.
    pub fn remove_detail(&mut self, offset: RegionOffset) -> Result<TxnDetail, Corruption> {
        let links = self
            .details
            .get(offset)
            .ok_or_else(|| Corruption(format!("detail {offset} is not allocated")))?
            .links;

        match links.prev {
            Some(prev) => {
                self.details
                    .get_mut(prev)
                    .ok_or_else(|| Corruption(format!("broken active list at {prev}")))?
                    .links
                    .next = links.next;
            }
            None => {
                if self.header.active_head != Some(offset) {
                    return Err(Corruption(format!(
                        "detail {offset} has no predecessor but is not the list head"
                    )));
                }
                self.header.active_head = links.next;
            }
        }
        if let Some(next) = links.next {
            self.details
                .get_mut(next)
                .ok_or_else(|| Corruption(format!("broken active list at {next}")))?
                .links
                .prev = links.prev;
        }

        self.header.nactive = self.header.nactive.saturating_sub(1);
        self.details
            .free(offset)
            .ok_or_else(|| Corruption(format!("detail {offset} vanished while unlinking")))
    }

    /// Walks the active list from the most recently begun transaction.
    pub fn active(&self) -> ActiveIter<'_> {
        ActiveIter {
            region: self,
            next: self.header.active_head,
        }
    }
}

pub struct ActiveIter<'a> {
    region: &'a Region,
    next: Option<RegionOffset>,
}

impl<'a> Iterator for ActiveIter<'a> {
    type Item = (RegionOffset, &'a TxnDetail);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next?;
        let detail = self.region.details.get(offset)?;
        self.next = detail.links.next;
        Some((offset, detail))
    }
}
