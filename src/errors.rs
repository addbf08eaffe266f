//! Crate-wide error type.
//!
//! Every failure in this engine is scoped to the current buffer, pool,
//! channel or command; nothing here is fatal to the process. The variants
//! mirror the conditions callers must be able to tell apart:
//!
//! | Variant           | code() | condition                                   |
//! |-------------------|--------|---------------------------------------------|
//! | `NoMemory`        | -12    | page / pool slot / staging allocation failed |
//! | `AlreadyExists`   | -17    | snapstore with this uuid already registered  |
//! | `NoDevice`        | -19    | unknown snapstore uuid or device             |
//! | `InvalidArgument` | -22    | malformed or truncated command               |
//! | `NoSpace`         | -28    | snapstore (or outbound queue) exhausted      |
//! | `BadIndex`        | -61    | page/element index beyond the buffer         |
//! | `Interrupted`     | -512   | blocking read interrupted; caller may retry  |
//!
//! `code()` is the value that travels in an ACKNOWLEDGE word (cast to u32),
//! so the numbers are part of the wire contract and never change.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapError {
    /// Allocation failed for a page, a descriptor slot or a staging buffer.
    #[error("not enough memory")]
    NoMemory,

    /// A snapstore with the same uuid is already registered.
    #[error("snapstore already exists")]
    AlreadyExists,

    /// No snapstore/device under the given identity.
    #[error("no such snapstore or device")]
    NoDevice,

    /// Truncated or otherwise malformed inbound command.
    #[error("invalid argument")]
    InvalidArgument,

    /// Backing storage exhausted, or a fixed-capacity queue overrun.
    #[error("no space left")]
    NoSpace,

    /// Indexed access beyond the page sequence.
    #[error("no data at index {index}: page {page_inx} >= page count {page_cnt}")]
    BadIndex {
        index: usize,
        page_inx: usize,
        page_cnt: usize,
    },

    /// A blocked read was interrupted before data arrived. Distinct from
    /// ordinary failure: the caller decides whether to restart the wait.
    #[error("interrupted while waiting")]
    Interrupted,
}

impl SnapError {
    /// Errno-style negative code; 0 is reserved for success on the wire.
    pub fn code(&self) -> i32 {
        match self {
            SnapError::NoMemory => -12,
            SnapError::AlreadyExists => -17,
            SnapError::NoDevice => -19,
            SnapError::InvalidArgument => -22,
            SnapError::NoSpace => -28,
            SnapError::BadIndex { .. } => -61,
            SnapError::Interrupted => -512,
        }
    }

    /// The code as it appears in an ACKNOWLEDGE payload word.
    pub fn wire_code(&self) -> u32 {
        self.code() as u32
    }
}

pub type Result<T> = std::result::Result<T, SnapError>;
