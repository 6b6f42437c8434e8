//! Memory Barrier Helpers
//!
//! The GPU front end fetches command words and page-table entries straight
//! out of system memory, so every CPU store to those buffers must be visible
//! before the register write that tells the GPU to look at them.
//!
//! ```ignore
//! words[n] = end_of_stream;
//! write_barrier();              // stream visible before the doorbell
//! regs.write32(FE_COMMAND_CONTROL, enable | prefetch);
//! ```

use core::sync::atomic::{Ordering, fence};

/// Read barrier (acquire semantics).
///
/// Use before reading memory the GPU may have written.
#[inline]
pub fn read_barrier() {
    fence(Ordering::Acquire);
}

/// Write barrier (release semantics).
///
/// Use before a register write that makes the GPU consume a buffer.
#[inline]
pub fn write_barrier() {
    fence(Ordering::Release);
}

/// Full memory barrier.
#[inline]
pub fn full_barrier() {
    fence(Ordering::SeqCst);
}

/// Barrier that also orders normal memory against device memory.
///
/// On arm64 this is `DSB SY`; elsewhere a sequentially consistent fence is
/// the strongest ordering available without platform help.
#[inline]
pub fn device_barrier() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: DSB is always safe to execute
    unsafe {
        core::arch::asm!("dsb sy", options(nostack, preserves_flags));
    }

    #[cfg(not(target_arch = "aarch64"))]
    full_barrier();
}
