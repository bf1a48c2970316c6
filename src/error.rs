use std::fmt;

use disk::DiskError;
use memory::MemoryError;
use swap_manager::SwapError;

use crate::translation::PageNumber;

#[derive(Debug, PartialEq)]
pub enum VmError {
    /// The faulting address is outside the process' pages. `vpn` is wide
    /// enough for any page of a 64-bit address.
    OutOfBounds { vpn: u64, num_pages: usize },
    /// A write hit a page loaded from a read-only section.
    ReadOnly { vpn: PageNumber },
    /// No swap slot is left for a dirty victim.
    SwapExhausted,
    InvariantViolation(String),
    Disk(DiskError),
    Memory(MemoryError),
    Swap(SwapError),
}

impl VmError {
    /// Errors caused by the process itself. The kernel terminates the process
    /// and keeps running.
    pub fn is_process_fault(&self) -> bool {
        matches!(self, VmError::OutOfBounds { .. } | VmError::ReadOnly { .. })
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> VmError {
        VmError::InvariantViolation(msg.into())
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::OutOfBounds { vpn, num_pages } => write!(
                f,
                "page {} is outside the address space ({} pages)",
                vpn, num_pages
            ),
            VmError::ReadOnly { vpn } => write!(f, "write to read-only page {}", vpn),
            VmError::SwapExhausted => write!(f, "swap space exhausted"),
            VmError::InvariantViolation(msg) => write!(f, "invariant violated: {}", msg),
            VmError::Disk(err) => write!(f, "{}", err),
            VmError::Memory(err) => write!(f, "{}", err),
            VmError::Swap(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for VmError {}

impl From<DiskError> for VmError {
    fn from(err: DiskError) -> Self {
        VmError::Disk(err)
    }
}

impl From<MemoryError> for VmError {
    fn from(err: MemoryError) -> Self {
        VmError::Memory(err)
    }
}

impl From<SwapError> for VmError {
    fn from(err: SwapError) -> Self {
        match err {
            SwapError::SwapExhausted => VmError::SwapExhausted,
            other => VmError::Swap(other),
        }
    }
}
