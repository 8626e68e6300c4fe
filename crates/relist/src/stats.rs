use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Per-lister counters; which strategy served each call and what the detector saw.
#[derive(Debug, Default)]
pub struct ListStats {
    watch_lists: AtomicU64,
    fallbacks: AtomicU64,
    plain_lists: AtomicU64,
    consistency_checks: AtomicU64,
    inconsistencies: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub watch_lists: u64,
    pub fallbacks: u64,
    pub plain_lists: u64,
    pub consistency_checks: u64,
    pub inconsistencies: u64,
}

impl ListStats {
    pub(crate) fn watch_list(&self) { self.watch_lists.fetch_add(1, Ordering::Relaxed); }
    pub(crate) fn fallback(&self) { self.fallbacks.fetch_add(1, Ordering::Relaxed); }
    pub(crate) fn plain_list(&self) { self.plain_lists.fetch_add(1, Ordering::Relaxed); }
    pub(crate) fn consistency_check(&self) { self.consistency_checks.fetch_add(1, Ordering::Relaxed); }
    pub(crate) fn inconsistency(&self) { self.inconsistencies.fetch_add(1, Ordering::Relaxed); }

    pub fn inconsistencies(&self) -> u64 { self.inconsistencies.load(Ordering::Relaxed) }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            watch_lists: self.watch_lists.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            plain_lists: self.plain_lists.load(Ordering::Relaxed),
            consistency_checks: self.consistency_checks.load(Ordering::Relaxed),
            inconsistencies: self.inconsistencies.load(Ordering::Relaxed),
        }
    }
}
