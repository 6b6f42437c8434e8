//! MMIO Region Abstraction
//!
//! Offset-based access to the GPU register window. All reads and writes use
//! volatile operations so the compiler never reorders or elides them.
//!
//! # Safety
//!
//! The caller is responsible for ensuring the base address points to a valid,
//! mapped MMIO region with device memory attributes.

use core::ptr::{read_volatile, write_volatile};

use crate::RegisterIo;

/// A memory-mapped register window.
#[derive(Clone, Copy)]
pub struct MmioRegion {
    base: usize,
    size: usize,
}

impl MmioRegion {
    /// Create a new MMIO region.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `base` points to a valid, mapped MMIO region of at least `size` bytes
    /// - The region has device memory attributes (non-cacheable)
    /// - No other code accesses this region concurrently without synchronisation
    #[inline]
    #[must_use]
    pub const unsafe fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

// SAFETY: MmioRegion is a plain address range; every access is a single
// volatile load or store, and callers serialise multi-register sequences.
unsafe impl Send for MmioRegion {}
// SAFETY: See above.
unsafe impl Sync for MmioRegion {}

impl RegisterIo for MmioRegion {
    /// # Panics
    ///
    /// Panics in debug builds if offset is out of bounds or misaligned.
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.size, "MMIO read32 offset out of bounds");
        debug_assert!(offset.is_multiple_of(4), "MMIO read32 offset not aligned");
        // SAFETY: Caller ensured base is valid MMIO, offset is within bounds
        unsafe { read_volatile((self.base + offset) as *const u32) }
    }

    /// # Panics
    ///
    /// Panics in debug builds if offset is out of bounds or misaligned.
    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.size, "MMIO write32 offset out of bounds");
        debug_assert!(offset.is_multiple_of(4), "MMIO write32 offset not aligned");
        // SAFETY: Caller ensured base is valid MMIO, offset is within bounds
        unsafe { write_volatile((self.base + offset) as *mut u32, value) }
    }
}

impl core::fmt::Debug for MmioRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmioRegion")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_reads_back_writes() {
        let mut backing = [0u32; 64];
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as usize, 256) };

        region.write32(0x10, 0xCAFE_F00D);
        assert_eq!(region.read32(0x10), 0xCAFE_F00D);
        assert_eq!(region.read32(0x14), 0);
        assert_eq!(backing[4], 0xCAFE_F00D);
    }
}
