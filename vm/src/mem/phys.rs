//! Physical memory handed to user processes, one lockable buffer per frame.

use crate::sync::{Mutex, MutexGuard};
use alloc::{boxed::Box, vec::Vec};
use core::fmt;
use kidneyos_shared::mem::PAGE_FRAME_SIZE;

/// Index of a physical frame in the user pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(pub usize);

impl FrameNumber {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {}", self.0)
    }
}

pub type FrameBytes = [u8; PAGE_FRAME_SIZE];

/// The frames themselves.
///
/// Each frame sits behind its own lock; it is a leaf lock, held only for the
/// duration of a copy into or out of the frame.
pub struct PhysicalMemory {
    frames: Box<[Mutex<FrameBytes>]>,
}

impl PhysicalMemory {
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames)
                .map(|_| Mutex::new([0; PAGE_FRAME_SIZE]))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Lock `frame` for reading or writing its contents.
    ///
    /// Panics if `frame` is not part of this memory.
    pub fn frame(&self, frame: FrameNumber) -> MutexGuard<'_, FrameBytes> {
        match self.frames.get(frame.index()) {
            Some(bytes) => bytes.lock(),
            None => panic!("{} out of range ({} frames)", frame, self.frames.len()),
        }
    }

    pub fn zero(&self, frame: FrameNumber) {
        self.frame(frame).fill(0);
    }
}
