use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::core::errors::{StorageError, TxnError};
use crate::log::{LogFacility, Lsn};

const MEMORY_LOG_FILE: u32 = 1;

#[derive(Debug)]
struct MemoryLogState {
    records: BTreeMap<Lsn, Vec<u8>>,
    next: Lsn,
    flushed: Lsn,
    flushes: u64,
}

/// Log facility kept entirely in process memory.
///
/// LSNs are byte offsets in a single virtual file, so `bytes_since` behaves
/// like a file-backed log. Nothing survives the process.
#[derive(Debug)]
pub struct MemoryLog {
    state: Mutex<MemoryLogState>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryLogState {
                records: BTreeMap::new(),
                next: Lsn::new(MEMORY_LOG_FILE, 0),
                flushed: Lsn::ZERO,
                flushes: 0,
            }),
        }
    }

    /// Number of `flush` calls served.
    pub fn flush_count(&self) -> u64 {
        self.state.lock().flushes
    }

    /// Highest LSN known to be flushed.
    pub fn flushed_lsn(&self) -> Lsn {
        self.state.lock().flushed
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// LSNs of every record, in log order.
    pub fn lsns(&self) -> Vec<Lsn> {
        self.state.lock().records.keys().copied().collect()
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogFacility for MemoryLog {
    fn append(&self, record: &[u8]) -> Result<Lsn, TxnError> {
        let mut state = self.state.lock();
        let lsn = state.next;
        let len = u32::try_from(record.len())
            .map_err(|_| StorageError(format!("log record too large: {} bytes", record.len())))?;
        let next_offset = lsn
            .offset
            .checked_add(len.max(1))
            .ok_or_else(|| StorageError("memory log is full".into()))?;
        state.records.insert(lsn, record.to_vec());
        state.next = Lsn::new(lsn.file, next_offset);
        Ok(lsn)
    }

    fn flush(&self, up_to: Lsn) -> Result<(), TxnError> {
        let mut state = self.state.lock();
        let last = state.records.keys().next_back().copied().unwrap_or(Lsn::ZERO);
        let target = if up_to.is_zero() { last } else { up_to.min(last) };
        if target > state.flushed {
            state.flushed = target;
        }
        state.flushes += 1;
        Ok(())
    }

    fn current_lsn(&self) -> Lsn {
        self.state.lock().next
    }

    fn read(&self, lsn: Lsn) -> Result<Vec<u8>, TxnError> {
        self.state
            .lock()
            .records
            .get(&lsn)
            .cloned()
            .ok_or_else(|| StorageError(format!("no log record at {lsn}")).into())
    }

    fn scan(
        &self,
        visit: &mut dyn FnMut(Lsn, &[u8]) -> Result<(), TxnError>,
    ) -> Result<(), TxnError> {
        let records: Vec<(Lsn, Vec<u8>)> = self
            .state
            .lock()
            .records
            .iter()
            .map(|(lsn, data)| (*lsn, data.clone()))
            .collect();
        for (lsn, data) in records {
            visit(lsn, &data)?;
        }
        Ok(())
    }
}
