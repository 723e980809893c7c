use core::sync::atomic::{AtomicUsize, Ordering};

/// Running counters for paging activity.
#[derive(Default)]
pub struct VmStats {
    evictions: AtomicUsize,
    swap_outs: AtomicUsize,
    discards: AtomicUsize,
    swap_ins: AtomicUsize,
    file_loads: AtomicUsize,
}

/// A point-in-time copy of [`VmStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VmStatsSnapshot {
    /// frames reclaimed by the clock
    pub evictions: usize,
    /// evicted pages written to swap
    pub swap_outs: usize,
    /// evicted clean file pages dropped without a write
    pub discards: usize,
    /// pages read back from swap
    pub swap_ins: usize,
    /// pages demand-loaded from a backing file
    pub file_loads: usize,
}

impl VmStats {
    pub(crate) fn record_swap_out(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.swap_outs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discard(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.discards.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_swap_in(&self) {
        self.swap_ins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_file_load(&self) {
        self.file_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> VmStatsSnapshot {
        VmStatsSnapshot {
            evictions: self.evictions.load(Ordering::Relaxed),
            swap_outs: self.swap_outs.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
            swap_ins: self.swap_ins.load(Ordering::Relaxed),
            file_loads: self.file_loads.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evictions_count_both_outcomes() {
        let stats = VmStats::default();
        stats.record_swap_out();
        stats.record_discard();
        stats.record_swap_in();
        assert_eq!(
            stats.snapshot(),
            VmStatsSnapshot {
                evictions: 2,
                swap_outs: 1,
                discards: 1,
                swap_ins: 1,
                file_loads: 0,
            }
        );
    }
}
