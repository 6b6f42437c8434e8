//! Error types for page allocation, record pools and arenas

use core::fmt;

/// Errors from a [`PageAllocator`](crate::PageAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageError {
    /// No block of the requested order is available.
    OutOfMemory,
    /// The order is larger than the allocator supports.
    InvalidOrder(u8),
    /// The block's physical address is not reachable by the GPU.
    Unaddressable,
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of physical pages"),
            Self::InvalidOrder(order) => write!(f, "unsupported page order {}", order),
            Self::Unaddressable => write!(f, "page is outside the GPU's 32-bit reach"),
        }
    }
}

/// Errors from a [`Pool`](crate::Pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Growing the pool failed or its record limit was reached.
    OutOfMemory,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "record pool exhausted"),
        }
    }
}

/// Errors from an [`ArenaAllocator`](crate::ArenaAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    /// No vacant run is large enough.
    Exhausted { requested: u32 },
    /// A zero-length or oversized request.
    InvalidCount(u32),
    /// No allocated run starts at the given position.
    NotFound { master: u32, slave: u32 },
    /// An allocated run starts there but has a different length.
    LengthMismatch { expected: u32, actual: u32 },
    /// A record could not be obtained.
    Pool(PoolError),
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { requested } => {
                write!(f, "no vacant run of {} pages", requested)
            }
            Self::InvalidCount(count) => write!(f, "invalid page count {}", count),
            Self::NotFound { master, slave } => {
                write!(f, "no allocated run at ({}, {})", master, slave)
            }
            Self::LengthMismatch { expected, actual } => {
                write!(f, "run length {} does not match allocated {}", actual, expected)
            }
            Self::Pool(e) => write!(f, "{}", e),
        }
    }
}

impl From<PoolError> for ArenaError {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}
