use core::fmt;

/// Failure reported by a block device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// sector lies past the end of the device
    SectorOutOfBounds,
    /// buffer is not exactly one sector long
    BufferInvalid,
    /// the device failed the transfer
    DeviceFailure,
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SectorOutOfBounds => write!(f, "sector past the end of the device"),
            Self::BufferInvalid => write!(f, "buffer is not one sector long"),
            Self::DeviceFailure => write!(f, "device failed the transfer"),
        }
    }
}

impl core::error::Error for BlockError {}
