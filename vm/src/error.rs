/// Recoverable failures of the virtual memory subsystem.
///
/// Broken invariants (double frees, evicting with every frame pinned) are not
/// represented here; they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// every swap slot is occupied, so no frame could be reclaimed
    SwapExhausted,
    /// fault address is neither mapped nor a valid stack access
    InvalidAccess,
    /// write to a page mapped read-only
    ReadOnly,
    /// backing file returned fewer bytes than the page needs
    FileRead,
    /// the address space could not install the mapping
    OutOfMemory,
    /// the page already has a supplemental page table entry
    AlreadyMapped,
    /// the page is not resident in a frame
    NotResident,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SwapExhausted => write!(f, "swap space exhausted"),
            Self::InvalidAccess => write!(f, "invalid memory access"),
            Self::ReadOnly => write!(f, "write to read-only page"),
            Self::FileRead => write!(f, "short read from backing file"),
            Self::OutOfMemory => write!(f, "out of memory for page mapping"),
            Self::AlreadyMapped => write!(f, "page already mapped"),
            Self::NotResident => write!(f, "page not resident"),
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
