// https://wiki.osdev.org/Paging

// Frame numbers are bounded by the 20-bit address field, so the usize to u32
// conversions below cannot truncate for any frame the hardware can address.
#![allow(clippy::cast_possible_truncation)]

use arbitrary_int::u20;
use bitbybit::bitfield;

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bit(7, rw)]
    page_attribute_table: bool,
    #[bit(8, rw)]
    global: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

/// Largest frame number a page table entry can point at.
pub const MAX_FRAME_NUMBER: usize = (1 << 20) - 1;

impl PageTableEntry {
    /// A present user entry pointing at frame number `frame`.
    ///
    /// Panics if `frame` does not fit in the 20-bit address field.
    pub fn user_page(frame: usize, writable: bool) -> Self {
        assert!(
            frame <= MAX_FRAME_NUMBER,
            "frame number {frame:#X} does not fit in a page table entry"
        );
        Self::DEFAULT
            .with_present(true)
            .with_user_supervisor(true)
            .with_read_write(writable)
            .with_page_frame_address(u20::new(frame as u32))
    }

    pub fn frame_number(&self) -> usize {
        self.page_frame_address().value() as usize
    }
}
