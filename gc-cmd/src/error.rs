//! Command stream errors

use core::fmt;
use core::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdError {
    /// The command buffer cannot hold the requested bytes.
    OutOfSpace { requested: usize, available: usize },
    /// A writer was asked to emit past its reservation.
    Overflow { offset: usize },
    /// The buffer block is too small or outside the GPU's reach.
    InvalidBuffer,
    /// The GPU did not signal completion in time.
    Timeout { waited: Duration },
    /// A command header promised more words than the stream holds.
    Truncated { offset: usize },
}

impl fmt::Display for CmdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfSpace { requested, available } => write!(
                f,
                "command buffer full: {} bytes requested, {} available",
                requested, available
            ),
            Self::Overflow { offset } => {
                write!(f, "command write past reservation at byte {}", offset)
            }
            Self::InvalidBuffer => write!(f, "unusable command buffer block"),
            Self::Timeout { waited } => write!(f, "GPU completion timed out after {:?}", waited),
            Self::Truncated { offset } => write!(f, "truncated command at word {}", offset),
        }
    }
}
