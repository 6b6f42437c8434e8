//! Register access for the GPU MMU core
//!
//! The rest of the workspace never touches raw device memory directly. It
//! talks to the GPU through [`RegisterIo`], which the platform implements
//! with a real [`MmioRegion`] and the tests implement with a recording fake.
//!
//! # Modules
//!
//! - [`region`]: Volatile, offset-based access to a mapped register window
//! - [`barrier`]: Memory barrier helpers for DMA buffer visibility
//! - `fake`: Recording register file (feature `fake`)
//!
//! # Example
//!
//! ```ignore
//! use gc_mmio::{MmioRegion, RegisterIo, barrier};
//!
//! let regs = unsafe { MmioRegion::new(gpu_base, 0x1_0000) };
//! let idle = regs.read32(0x0004);
//! barrier::write_barrier();
//! regs.write32(0x0658, control);
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(any(test, feature = "fake"))]
extern crate alloc;

pub mod barrier;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod region;

pub use barrier::{device_barrier, full_barrier, read_barrier, write_barrier};
#[cfg(any(test, feature = "fake"))]
pub use fake::FakeRegisters;
pub use region::MmioRegion;

/// Raw 32-bit register access to one GPU core.
///
/// Offsets are byte offsets from the start of the register window and are
/// always 4-byte aligned. Implementations must perform each access exactly
/// once and in program order.
pub trait RegisterIo: Send + Sync {
    /// Read the register at `offset`.
    fn read32(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`.
    fn write32(&self, offset: usize, value: u32);
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }
}
