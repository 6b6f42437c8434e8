//! MMU error type and its errno mapping

use core::fmt;

use gc_cmd::CmdError;
use gc_paging::{ArenaError, GpuVa, PageError, PoolError};

/// Out of memory
pub const ENOMEM: i32 = 12;
/// Invalid argument
pub const EINVAL: i32 = 22;
/// No such entry
pub const ENOENT: i32 = 2;
/// Timed out
pub const ETIMEDOUT: i32 = 110;

/// Errors returned by the MMU core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuError {
    /// A page, table, record or command buffer allocation failed.
    OutOfMemory,
    /// The context belongs to another device.
    ForeignContext,
    /// The MMU is not translating yet.
    NotEnabled,
    /// The MMU was enabled before; the hardware latches the first enable.
    AlreadyEnabled,
    /// Physical memory descriptor uses a page size other than 4KB.
    InvalidPageSize(usize),
    /// Zero pages, or more than one address space holds.
    InvalidPageCount(usize),
    /// Byte offset not inside the first page.
    InvalidOffset(u32),
    /// A page frame the GPU cannot reach with 32-bit addresses.
    Unaddressable(u64),
    /// Nothing is mapped at the given GPU address.
    NotMapped(GpuVa),
    /// A run was freed with a length that differs from its allocation.
    LengthMismatch { expected: u32, actual: u32 },
    /// The GPU did not complete a submission in time.
    Timeout,
    /// The command buffer memory cannot be used by the GPU.
    InvalidBuffer,
}

impl MmuError {
    /// Negative errno value for this error.
    #[must_use]
    pub const fn errno(self) -> i32 {
        -(match self {
            Self::OutOfMemory => ENOMEM,
            Self::NotMapped(_) => ENOENT,
            Self::Timeout => ETIMEDOUT,
            Self::ForeignContext
            | Self::NotEnabled
            | Self::AlreadyEnabled
            | Self::InvalidPageSize(_)
            | Self::InvalidPageCount(_)
            | Self::InvalidOffset(_)
            | Self::Unaddressable(_)
            | Self::LengthMismatch { .. }
            | Self::InvalidBuffer => EINVAL,
        })
    }
}

impl fmt::Display for MmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::ForeignContext => write!(f, "context belongs to another device"),
            Self::NotEnabled => write!(f, "MMU not enabled"),
            Self::AlreadyEnabled => write!(f, "MMU already enabled"),
            Self::InvalidPageSize(size) => write!(f, "unsupported page size {}", size),
            Self::InvalidPageCount(count) => write!(f, "invalid page count {}", count),
            Self::InvalidOffset(offset) => write!(f, "offset {:#x} outside the first page", offset),
            Self::Unaddressable(pfn) => write!(f, "page frame {:#x} out of GPU reach", pfn),
            Self::NotMapped(address) => write!(f, "nothing mapped at {}", address),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "run of {} pages unmapped as {}", expected, actual)
            }
            Self::Timeout => write!(f, "GPU timed out"),
            Self::InvalidBuffer => write!(f, "command buffer unusable"),
        }
    }
}

// Pages the GPU cannot reach are as good as no pages.
impl From<PageError> for MmuError {
    fn from(_: PageError) -> Self {
        Self::OutOfMemory
    }
}

impl From<PoolError> for MmuError {
    fn from(_: PoolError) -> Self {
        Self::OutOfMemory
    }
}

impl From<ArenaError> for MmuError {
    fn from(e: ArenaError) -> Self {
        match e {
            ArenaError::Exhausted { .. } | ArenaError::Pool(_) => Self::OutOfMemory,
            ArenaError::InvalidCount(count) => Self::InvalidPageCount(count as usize),
            ArenaError::NotFound { master, slave } => {
                Self::NotMapped(GpuVa::compose(master, slave, 0))
            }
            ArenaError::LengthMismatch { expected, actual } => {
                Self::LengthMismatch { expected, actual }
            }
        }
    }
}

impl From<CmdError> for MmuError {
    fn from(e: CmdError) -> Self {
        match e {
            CmdError::OutOfSpace { .. } | CmdError::Overflow { .. } => Self::OutOfMemory,
            CmdError::Timeout { .. } => Self::Timeout,
            CmdError::InvalidBuffer | CmdError::Truncated { .. } => Self::InvalidBuffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn test_errno_values() {
        assert_eq!(MmuError::OutOfMemory.errno(), -12);
        assert_eq!(MmuError::ForeignContext.errno(), -22);
        assert_eq!(MmuError::NotMapped(GpuVa::new(0)).errno(), -2);
        assert_eq!(MmuError::Timeout.errno(), -110);
    }

    #[test]
    fn test_lower_layer_mapping() {
        assert_eq!(MmuError::from(ArenaError::Exhausted { requested: 4 }), MmuError::OutOfMemory);
        assert_eq!(
            MmuError::from(ArenaError::NotFound { master: 1, slave: 2 }),
            MmuError::NotMapped(GpuVa::new(0x0100_2000))
        );
        assert_eq!(MmuError::from(ArenaError::InvalidCount(0)).errno(), -EINVAL);
        assert_eq!(
            MmuError::from(CmdError::OutOfSpace { requested: 8, available: 4 }),
            MmuError::OutOfMemory
        );
        assert_eq!(
            MmuError::from(CmdError::Timeout { waited: Duration::from_millis(1) }),
            MmuError::Timeout
        );
        assert_eq!(MmuError::from(PageError::OutOfMemory).errno(), -ENOMEM);
    }
}
