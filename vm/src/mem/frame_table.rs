//! The frame table: which process page each user frame holds, and the clock
//! that picks a frame to reclaim when none are free.

use super::frame_allocator::UserPool;
use super::page_table::{Eviction, PageStatus, Released};
use super::phys::{FrameNumber, PhysicalMemory};
use super::swap::SwapSpace;
use super::VirtPage;
use crate::error::Result;
use crate::process::{Pid, ProcessMemory};
use crate::stats::VmStats;
use crate::sync::Mutex;
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use log::{debug, trace};

struct FrameTableEntry {
    owner: Arc<ProcessMemory>,
    page: VirtPage,
}

struct FrameTable {
    pool: UserPool,
    entries: Box<[Option<FrameTableEntry>]>,
    /// Clock hand: the next frame the clock examines.
    hand: usize,
}

impl FrameTable {
    /// Sweep the clock until it finds an unpinned frame whose page has not
    /// been accessed since the last sweep, clearing accessed bits on the way.
    ///
    /// Two full turns are enough unless pages are touched again behind the
    /// hand; then the first unpinned frame it passed is taken. `None` means
    /// every frame is pinned.
    fn pick_victim(&mut self) -> Option<FrameNumber> {
        let frames = self.entries.len();
        let mut first_seen = None;
        for _ in 0..2 * frames {
            let frame = FrameNumber(self.hand);
            self.hand = (self.hand + 1) % frames;

            if !self.pool.is_allocated(frame) || self.pool.is_pinned(frame) {
                continue;
            }
            let Some(entry) = &self.entries[frame.index()] else {
                continue;
            };

            let directory = entry.owner.directory();
            if directory.is_accessed(entry.page) {
                directory.set_accessed(entry.page, false);
                if first_seen.is_none() {
                    first_seen = Some(frame);
                }
            } else {
                return Some(frame);
            }
        }

        let frame = first_seen?;
        self.hand = (frame.index() + 1) % frames;
        Some(frame)
    }

    fn release(&mut self, frame: FrameNumber) {
        if self.entries[frame.index()].take().is_none() {
            panic!("frame table: release of untracked {frame}");
        }
        self.pool.dealloc(frame);
    }
}

/// Hands out user frames, evicting resident pages when the pool runs dry.
///
/// Every frame handed out is pinned until the caller unpins it, so the clock
/// never reclaims a frame whose page is still being brought in.
pub struct FrameAllocator {
    table: Mutex<FrameTable>,
    memory: Arc<PhysicalMemory>,
    swap: Arc<SwapSpace>,
    stats: VmStats,
}

impl FrameAllocator {
    pub fn new(memory: Arc<PhysicalMemory>, swap: Arc<SwapSpace>) -> Self {
        let frames = memory.len();
        Self {
            table: Mutex::new(FrameTable {
                pool: UserPool::new(frames),
                entries: (0..frames).map(|_| None).collect::<Vec<_>>().into_boxed_slice(),
                hand: 0,
            }),
            memory,
            swap,
            stats: VmStats::default(),
        }
    }

    /// Get a pinned frame for `page` of `owner`, evicting another page if no
    /// frame is free. The frame is zeroed if `zero` is set.
    ///
    /// Fails with [`Error::SwapExhausted`](crate::error::Error::SwapExhausted)
    /// if the victim needed to go to swap and swap is full.
    pub fn allocate(
        &self,
        owner: &Arc<ProcessMemory>,
        page: VirtPage,
        zero: bool,
    ) -> Result<FrameNumber> {
        let frame = {
            let mut table = self.table.lock();
            let frame = match table.pool.alloc() {
                Some(frame) => frame,
                None => self.evict(&mut table)?,
            };
            table.pool.set_pinned(frame, true);
            table.entries[frame.index()] = Some(FrameTableEntry {
                owner: owner.clone(),
                page,
            });
            frame
        };
        trace!("{frame} now holds {page} of process {}", owner.pid());

        if zero {
            self.memory.zero(frame);
        }
        Ok(frame)
    }

    /// Reclaim a frame with the clock. The frame stays allocated in the pool
    /// for the caller to reuse.
    ///
    /// Panics if every frame is pinned.
    fn evict(&self, table: &mut FrameTable) -> Result<FrameNumber> {
        let Some(frame) = table.pick_victim() else {
            panic!("frame table: every frame is pinned, nothing to evict");
        };
        let (owner, page) = match &table.entries[frame.index()] {
            Some(entry) => (entry.owner.clone(), entry.page),
            None => panic!("frame table: victim {frame} has no owner"),
        };

        let mut spt = owner.table();
        let Some(entry) = spt.get(page) else {
            panic!("frame table: {page} of process {} has no entry", owner.pid());
        };
        if entry.status() != PageStatus::Resident(frame) {
            panic!(
                "frame table: {frame} holds {page} of process {}, which is {:?}",
                owner.pid(),
                entry.status()
            );
        }
        let (writable, had_been_dirty, has_file) =
            (entry.writable(), entry.dirty(), entry.origin().is_some());

        // Once the mapping is gone no user access can touch the frame, so the
        // dirty bit read after this is final.
        let directory = owner.directory();
        let accessed = directory.is_accessed(page);
        directory.clear(page);
        let dirty = directory.is_dirty(page) || had_been_dirty;

        let eviction = if has_file && !dirty {
            Eviction::Discarded
        } else {
            match self.swap.allocate() {
                Ok(slot) => Eviction::Swapped(slot),
                Err(err) => {
                    if !directory.map(page, frame, writable) {
                        panic!("frame table: could not restore mapping of {page}");
                    }
                    directory.set_accessed(page, accessed);
                    directory.set_dirty(page, dirty);
                    return Err(err);
                }
            }
        };

        if let Eviction::Swapped(slot) = eviction {
            self.swap.write(slot, &self.memory.frame(frame));
            self.stats.record_swap_out();
        } else {
            self.stats.record_discard();
        }

        if let Err(err) = spt.mark_evicted(page, eviction, dirty) {
            panic!("frame table: evicting {page}: {err}");
        }
        table.entries[frame.index()] = None;

        debug!(
            "evicted {page} of process {} from {frame} ({:?})",
            owner.pid(),
            eviction
        );
        Ok(frame)
    }

    /// Return `frame` to the pool.
    ///
    /// Panics if the frame is not tracked.
    pub fn free(&self, frame: FrameNumber) {
        self.table.lock().release(frame);
    }

    pub fn pin(&self, frame: FrameNumber) {
        self.table.lock().pool.set_pinned(frame, true);
    }

    pub fn unpin(&self, frame: FrameNumber) {
        self.table.lock().pool.set_pinned(frame, false);
    }

    pub fn is_pinned(&self, frame: FrameNumber) -> bool {
        self.table.lock().pool.is_pinned(frame)
    }

    pub fn is_tracked(&self, frame: FrameNumber) -> bool {
        self.table
            .lock()
            .entries
            .get(frame.index())
            .is_some_and(Option::is_some)
    }

    /// The process and page `frame` holds.
    pub fn owner_of(&self, frame: FrameNumber) -> Option<(Pid, VirtPage)> {
        self.table
            .lock()
            .entries
            .get(frame.index())?
            .as_ref()
            .map(|entry| (entry.owner.pid(), entry.page))
    }

    /// Run the clock without evicting anything.
    pub fn pick_victim(&self) -> Option<FrameNumber> {
        self.table.lock().pick_victim()
    }

    pub fn frames_in_use(&self) -> usize {
        self.table.lock().pool.frames_allocated()
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    pub fn stats(&self) -> &VmStats {
        &self.stats
    }

    /// Free every frame and swap slot held by `process` and forget its pages.
    ///
    /// The caller must hold the process's fault lock, so none of its frames
    /// are pinned.
    pub fn release_process(&self, process: &ProcessMemory) -> Released {
        let mut table = self.table.lock();
        let mut spt = process.table();
        spt.destroy(
            |frame| table.release(frame),
            &self.swap,
            process.directory(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mem::page_directory::{PageDirectory, SoftPageDirectory};
    use crate::test_support::{process, vm};

    fn page(n: usize) -> VirtPage {
        VirtPage::from_base(0x1000_0000 + n * 0x1000)
    }

    #[test]
    fn clock_skips_accessed_frames() {
        let vm = vm(4, 4);
        let (proc, dir) = process(&vm, 1);
        for n in 0..4 {
            vm.map_new_page(&proc, page(n), true).unwrap();
        }
        for (n, accessed) in [true, true, false, true].into_iter().enumerate() {
            dir.set_accessed(page(n), accessed);
        }

        vm.map_new_page(&proc, page(4), true).unwrap();

        assert!(matches!(proc.lookup(page(2)), Some(PageStatus::Swapped(_))));
        for n in [0, 1, 3] {
            assert!(matches!(proc.lookup(page(n)), Some(PageStatus::Resident(_))));
        }
        // The hand stopped at the victim, so frame 3 was never looked at.
        assert!(!dir.is_accessed(page(0)));
        assert!(!dir.is_accessed(page(1)));
        assert!(dir.is_accessed(page(3)));
        assert_eq!(vm.frames().owner_of(FrameNumber(2)), Some((1, page(4))));
        assert_eq!(vm.stats().evictions, 1);
    }

    #[test]
    fn clock_hand_keeps_its_place() {
        let vm = vm(3, 8);
        let (proc, _dir) = process(&vm, 1);
        for n in 0..3 {
            vm.map_new_page(&proc, page(n), true).unwrap();
        }
        assert_eq!(vm.frames().pick_victim(), Some(FrameNumber(0)));
        assert_eq!(vm.frames().pick_victim(), Some(FrameNumber(1)));
        assert_eq!(vm.frames().pick_victim(), Some(FrameNumber(2)));
        assert_eq!(vm.frames().pick_victim(), Some(FrameNumber(0)));
    }

    #[test]
    fn pinned_frames_are_never_victims() {
        let vm = vm(3, 8);
        let (proc, dir) = process(&vm, 1);
        for n in 0..3 {
            vm.map_new_page(&proc, page(n), true).unwrap();
        }
        vm.frames().pin(FrameNumber(0));
        vm.frames().pin(FrameNumber(1));
        dir.set_accessed(page(2), true);

        for _ in 0..4 {
            assert_eq!(vm.frames().pick_victim(), Some(FrameNumber(2)));
        }

        vm.frames().pin(FrameNumber(2));
        assert_eq!(vm.frames().pick_victim(), None);
    }

    /// A directory whose present pages are touched again as soon as their
    /// accessed bit is cleared.
    struct BusyDirectory(SoftPageDirectory);

    impl PageDirectory for BusyDirectory {
        fn map(&self, page: VirtPage, frame: FrameNumber, writable: bool) -> bool {
            self.0.map(page, frame, writable)
        }

        fn clear(&self, page: VirtPage) {
            self.0.clear(page);
        }

        fn is_accessed(&self, page: VirtPage) -> bool {
            self.0.translate(page).is_some()
        }

        fn set_accessed(&self, page: VirtPage, accessed: bool) {
            self.0.set_accessed(page, accessed);
        }

        fn is_dirty(&self, page: VirtPage) -> bool {
            self.0.is_dirty(page)
        }

        fn set_dirty(&self, page: VirtPage, dirty: bool) {
            self.0.set_dirty(page, dirty);
        }
    }

    #[test]
    fn busy_pages_are_still_evicted() {
        let vm = vm(2, 8);
        let dir = Arc::new(BusyDirectory(SoftPageDirectory::new(vm.memory().clone())));
        let proc = vm.create_table(1, dir);
        for n in 0..2 {
            vm.map_new_page(&proc, page(n), true).unwrap();
        }
        assert!(!vm.frames().is_pinned(FrameNumber(0)));
        assert!(!vm.frames().is_pinned(FrameNumber(1)));

        vm.map_new_page(&proc, page(2), true).unwrap();
        assert!(matches!(proc.lookup(page(0)), Some(PageStatus::Swapped(_))));
        assert_eq!(vm.frames().owner_of(FrameNumber(0)), Some((1, page(2))));

        // The hand moved past the last victim.
        vm.map_new_page(&proc, page(3), true).unwrap();
        assert!(matches!(proc.lookup(page(1)), Some(PageStatus::Swapped(_))));
        assert_eq!(vm.stats().evictions, 2);
    }

    #[test]
    #[should_panic(expected = "every frame is pinned")]
    fn evicting_with_every_frame_pinned_panics() {
        let vm = vm(2, 8);
        let (proc, _dir) = process(&vm, 1);
        for n in 0..2 {
            vm.map_new_page(&proc, page(n), true).unwrap();
            vm.frames().pin(FrameNumber(n));
        }
        let _ = vm.map_new_page(&proc, page(2), true);
    }

    #[test]
    fn full_swap_keeps_victim_resident() {
        let vm = vm(2, 1);
        let (proc, dir) = process(&vm, 1);
        for n in 0..3 {
            vm.map_new_page(&proc, page(n), true).unwrap();
        }
        assert_eq!(vm.swap().slots_in_use(), 1);

        let before: Vec<_> = (0..3).map(|n| proc.lookup(page(n))).collect();
        assert_eq!(
            vm.map_new_page(&proc, page(3), true),
            Err(Error::SwapExhausted)
        );
        let after: Vec<_> = (0..3).map(|n| proc.lookup(page(n))).collect();
        assert_eq!(before, after);
        assert_eq!(dir.mapped_pages(), 2);
        assert_eq!(proc.lookup(page(3)), None);
        assert_eq!(vm.frames().frames_in_use(), 2);
    }

    #[test]
    fn allocated_frames_are_tracked_and_freed_frames_are_not() {
        let vm = vm(4, 4);
        let (proc, _dir) = process(&vm, 1);

        let frame = vm.frames().allocate(&proc, page(0), true).unwrap();
        assert!(vm.frames().is_tracked(frame));
        assert!(vm.frames().is_pinned(frame));
        assert_eq!(vm.frames().frames_in_use(), 1);

        vm.frames().free(frame);
        assert!(!vm.frames().is_tracked(frame));
        assert_eq!(vm.frames().frames_in_use(), 0);
        assert_eq!(vm.frames().owner_of(frame), None);
    }

    #[test]
    #[should_panic(expected = "release of untracked frame 0")]
    fn double_free_of_frame_panics() {
        let vm = vm(2, 4);
        let (proc, _dir) = process(&vm, 1);
        let frame = vm.frames().allocate(&proc, page(0), false).unwrap();
        vm.frames().free(frame);
        vm.frames().free(frame);
    }
}
