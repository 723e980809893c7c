use crate::sizes::{KB, MB};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x80000000;

// User stacks grow down from OFFSET and may not exceed this size.
pub const USER_STACK_SIZE: usize = 8 * MB;

// `pusha` writes 32 bytes below the stack pointer before the pointer moves,
// so faults this far below esp still count as stack accesses.
pub const STACK_PUSH_MARGIN: usize = 32;

/// Round `addr` down to the start of its page.
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

/// Offset of `addr` within its page.
#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_user_vaddr(addr: usize) -> bool {
    addr < OFFSET
}
