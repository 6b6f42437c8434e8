//! Typed physical and GPU virtual addresses
//!
//! Provides compile-time distinction between CPU-physical addresses (what the
//! GPU fetches from) and GPU virtual addresses (what the GPU's MMU translates).

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Add, Sub};

use crate::{MASTER_ENTRIES, MASTER_SHIFT, PAGE_SIZE, SLAVE_ENTRIES, SLAVE_SHIFT};

/// Marker trait for address kinds
pub trait MemKind: private::Sealed + Copy + Clone {
    const LABEL: &'static str;
}

/// Physical address space marker
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Physical;

/// GPU virtual address space marker
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gpu;

impl MemKind for Physical {
    const LABEL: &'static str = "PA";
}

impl MemKind for Gpu {
    const LABEL: &'static str = "GPU";
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Physical {}
    impl Sealed for super::Gpu {}
}

/// An address in either physical or GPU virtual address space
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address<K: MemKind> {
    value: u64,
    _kind: PhantomData<K>,
}

/// Physical address
pub type PA = Address<Physical>;

/// GPU virtual address
pub type GpuVa = Address<Gpu>;

impl<K: MemKind> Address<K> {
    #[inline]
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _kind: PhantomData,
        }
    }

    /// Get the raw address value
    #[inline]
    pub const fn value(self) -> u64 {
        self.value
    }

    /// Check if address is page-aligned (4KB)
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.value & (PAGE_SIZE as u64 - 1) == 0
    }

    /// Align address down to page boundary
    #[inline]
    #[must_use]
    pub const fn page_align_down(self) -> Self {
        Self::new(self.value & !(PAGE_SIZE as u64 - 1))
    }

    /// Get the page offset (lower 12 bits)
    #[inline]
    pub const fn page_offset(self) -> usize {
        (self.value & (PAGE_SIZE as u64 - 1)) as usize
    }

    /// Add an offset to this address
    #[inline]
    #[must_use]
    pub const fn offset(self, offset: u64) -> Self {
        Self::new(self.value + offset)
    }

    /// The address as a 32-bit value, if it fits.
    ///
    /// The GPU's descriptors and command stream carry 32-bit addresses.
    #[inline]
    pub const fn to_u32(self) -> Option<u32> {
        if self.value <= u32::MAX as u64 {
            Some(self.value as u32)
        } else {
            None
        }
    }
}

impl PA {
    /// Physical address of a page frame number.
    #[inline]
    pub const fn from_pfn(pfn: u64) -> Self {
        Self::new(pfn << crate::PAGE_SHIFT)
    }

    #[inline]
    pub const fn pfn(self) -> u64 {
        self.value >> crate::PAGE_SHIFT
    }
}

impl GpuVa {
    /// Build a GPU address from table indices and a byte offset.
    #[inline]
    pub const fn compose(master: u32, slave: u32, offset: u32) -> Self {
        let master = (master as u64) << MASTER_SHIFT;
        let slave = (slave as u64) << SLAVE_SHIFT;
        Self::new(master | slave | offset as u64)
    }

    /// Index into the master table.
    #[inline]
    pub const fn master_index(self) -> u32 {
        ((self.value >> MASTER_SHIFT) as u32) & (MASTER_ENTRIES - 1)
    }

    /// Index into the slave table.
    #[inline]
    pub const fn slave_index(self) -> u32 {
        ((self.value >> SLAVE_SHIFT) as u32) & (SLAVE_ENTRIES - 1)
    }
}

impl<K: MemKind> Add<u64> for Address<K> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self::new(self.value + rhs)
    }
}

impl<K: MemKind> Sub for Address<K> {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.value - rhs.value
    }
}

impl<K: MemKind> fmt::Debug for Address<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#010x})", K::LABEL, self.value)
    }
}

impl<K: MemKind> fmt::Display for Address<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.value)
    }
}
