use std::fmt;

/// Domain-level errors shared by every subsystem in this workspace.
///
/// These map 1:1 onto the error kinds named in spec.md §7. Every subsystem
/// surfaces `FramError` unchanged to its caller except at the device layer,
/// where a `Transport` error additionally updates the health counters
/// before being returned.
#[derive(Debug, thiserror::Error)]
pub enum FramError {
    /// A null/out-of-range/over-long argument was passed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A buffer was too small for the stored value, or a range fell
    /// outside a partition or device bound.
    #[error("invalid size: {0}")]
    InvalidSize(InvalidSizeDetail),

    /// The resource is uninitialized, read-only, or otherwise not usable
    /// for the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The requested item (key, superblock copy, ring entry, partition)
    /// does not exist.
    #[error("not found")]
    NotFound,

    /// Lock acquisition exceeded its configured budget.
    #[error("timeout acquiring lock")]
    Timeout,

    /// The operation would overflow its backing partition, or a mutex
    /// could not be allocated.
    #[error("no memory: {0}")]
    NoMemory(&'static str),

    /// A record's CRC32 did not match its stored value.
    #[error("crc mismatch")]
    InvalidCrc,

    /// Surfaced from the HAL; also counted against device health.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Extra context for [`FramError::InvalidSize`].
///
/// The C driver this crate is grounded on reports a too-small caller
/// buffer by writing the required length back through an out-param
/// (`*len = required; return ESP_ERR_INVALID_SIZE;`), since its `get`/
/// `load`/`peek` calls fill a caller-owned buffer. Every equivalent call
/// here returns a freshly allocated `Vec<u8>` instead, so that case never
/// arises in this workspace — only an out-of-bounds range does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidSizeDetail {
    /// A range (addr/len, or an on-media length field) fell outside its
    /// bound.
    OutOfRange,
}

impl fmt::Display for InvalidSizeDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidSizeDetail::OutOfRange => write!(f, "out of range"),
        }
    }
}

/// Convenience result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, FramError>;
