use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub enum LockStatKind {
    Region,
    ThreadChain,
    Checkpoint,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct LockCounterSnapshot {
    pub acquires: u64,
    pub wait_ns: u64,
    pub hold_ns: u64,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct LockStatsSnapshot {
    pub region: LockCounterSnapshot,
    pub thread_chain: LockCounterSnapshot,
    pub checkpoint: LockCounterSnapshot,
}

#[derive(Debug, Default)]
struct LockCounter {
    acquires: AtomicU64,
    wait_ns: AtomicU64,
    hold_ns: AtomicU64,
}

impl LockCounter {
    fn record_wait(&self, wait: Duration) {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        self.wait_ns
            .fetch_add(duration_as_u64_ns(wait), Ordering::Relaxed);
    }

    fn record_hold(&self, hold: Duration) {
        self.hold_ns
            .fetch_add(duration_as_u64_ns(hold), Ordering::Relaxed);
    }

    fn snapshot(&self) -> LockCounterSnapshot {
        LockCounterSnapshot {
            acquires: self.acquires.load(Ordering::Relaxed),
            wait_ns: self.wait_ns.load(Ordering::Relaxed),
            hold_ns: self.hold_ns.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.acquires.store(0, Ordering::Relaxed);
        self.wait_ns.store(0, Ordering::Relaxed);
        self.hold_ns.store(0, Ordering::Relaxed);
    }
}

/// Wait/hold accounting for the manager's internal locks.
///
/// Owned by one manager; every attached clone shares it. Recording is a no-op
/// unless enabled through `ManagerConfig::lock_stats_enabled`.
#[derive(Debug, Default)]
pub struct LockStats {
    enabled: AtomicBool,
    region: LockCounter,
    thread_chain: LockCounter,
    checkpoint: LockCounter,
}

impl LockStats {
    pub fn new(enabled: bool) -> Self {
        let stats = Self::default();
        stats.enabled.store(enabled, Ordering::Relaxed);
        stats
    }

    fn counter(&self, kind: LockStatKind) -> &LockCounter {
        match kind {
            LockStatKind::Region => &self.region,
            LockStatKind::ThreadChain => &self.thread_chain,
            LockStatKind::Checkpoint => &self.checkpoint,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.region.reset();
        self.thread_chain.reset();
        self.checkpoint.reset();
    }

    pub fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot {
            region: self.region.snapshot(),
            thread_chain: self.thread_chain.snapshot(),
            checkpoint: self.checkpoint.snapshot(),
        }
    }

    pub fn record_wait(&self, kind: LockStatKind, wait: Duration) {
        if !self.enabled() {
            return;
        }
        self.counter(kind).record_wait(wait);
    }

    pub fn begin_hold(&self, kind: LockStatKind) -> LockHoldGuard<'_> {
        LockHoldGuard {
            stats: self,
            kind,
            start: Instant::now(),
            enabled: self.enabled(),
        }
    }
}

pub struct LockHoldGuard<'a> {
    stats: &'a LockStats,
    kind: LockStatKind,
    start: Instant,
    enabled: bool,
}

impl Drop for LockHoldGuard<'_> {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        self.stats
            .counter(self.kind)
            .record_hold(self.start.elapsed());
    }
}

fn duration_as_u64_ns(duration: Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}
