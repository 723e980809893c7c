pub mod placement_algorithms;

use super::phys::FrameNumber;
use alloc::{boxed::Box, vec};
use bitbybit::bitfield;
use placement_algorithms::{NextFit, PlacementAlgorithm};

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    #[bit(1, rw)]
    pinned: bool,
}

/// The pool of frames available to user processes.
///
/// Tracks which frames are handed out and which of those are pinned; who owns
/// a frame is the frame table's business.
pub struct UserPool<P: PlacementAlgorithm = NextFit> {
    core_map: Box<[CoreMapEntry]>,
    placement_algorithm: P,
    frames_allocated: usize,
}

impl<P: PlacementAlgorithm> UserPool<P> {
    pub fn new(num_frames_in_system: usize) -> Self {
        Self {
            core_map: vec![CoreMapEntry::DEFAULT; num_frames_in_system].into_boxed_slice(),
            placement_algorithm: P::default(),
            frames_allocated: 0,
        }
    }

    /// Hand out a single free frame, or `None` if every frame is in use.
    pub fn alloc(&mut self) -> Option<FrameNumber> {
        if self.frames_allocated == self.core_map.len() {
            return None;
        }

        let i = self.placement_algorithm.place(&self.core_map)?;

        assert!(!self.core_map[i].allocated());
        self.core_map[i] = CoreMapEntry::DEFAULT.with_allocated(true);
        self.frames_allocated += 1;

        Some(FrameNumber(i))
    }

    /// Return `frame` to the pool.
    ///
    /// Panics if the frame was not allocated.
    pub fn dealloc(&mut self, frame: FrameNumber) {
        let entry = self.entry(frame);
        assert!(entry.allocated(), "double free of user {frame}");

        self.core_map[frame.index()] = CoreMapEntry::DEFAULT;
        self.frames_allocated -= 1;
    }

    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        self.core_map
            .get(frame.index())
            .is_some_and(|entry| entry.allocated())
    }

    pub fn set_pinned(&mut self, frame: FrameNumber, pinned: bool) {
        let entry = self.entry(frame);
        assert!(entry.allocated(), "pinning free user {frame}");
        self.core_map[frame.index()] = entry.with_pinned(pinned);
    }

    pub fn is_pinned(&self, frame: FrameNumber) -> bool {
        self.entry(frame).pinned()
    }

    pub fn frames_allocated(&self) -> usize {
        self.frames_allocated
    }

    pub fn capacity(&self) -> usize {
        self.core_map.len()
    }

    fn entry(&self, frame: FrameNumber) -> CoreMapEntry {
        match self.core_map.get(frame.index()) {
            Some(entry) => *entry,
            None => panic!("{} is not part of the user pool", frame),
        }
    }
}
