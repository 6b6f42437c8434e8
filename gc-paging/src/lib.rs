//! GPU page tables and virtual address space bookkeeping
//!
//! This crate holds everything about the GPU's two-level translation scheme
//! that does not need to talk to hardware registers:
//!
//! - `address`: Typed physical and GPU virtual addresses (`PA`, `GpuVa`)
//! - `page`: Order-aligned physical page blocks and the `PageAllocator` seam
//! - `descriptors`: Master (MTLB) and slave (STLB) entry formats
//! - `tables`: Master table wrapper and the slave table manager
//! - `pool`: Index-based record slab with generation-checked handles
//! - `arena`: Vacant/allocated run lists with split and coalesce
//! - `host`: Heap-backed page allocator (feature `host`)
//!
//! # Geometry
//!
//! ```text
//!  31          24 23                    12 11                0
//! +--------------+------------------------+-------------------+
//! | master index |      slave index       |   page offset     |
//! +--------------+------------------------+-------------------+
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod address;
pub mod arena;
pub mod descriptors;
pub mod error;
#[cfg(any(test, feature = "host"))]
pub mod host;
pub mod page;
pub mod pool;
pub mod tables;

pub use address::{Address, Gpu, GpuVa, MemKind, PA, Physical};
pub use arena::{Arena, ArenaAllocator, PageRun, siblings};
pub use descriptors::{MasterEntry, SlaveEntry};
pub use error::{ArenaError, PageError, PoolError};
#[cfg(any(test, feature = "host"))]
pub use host::HostPageAllocator;
pub use page::{PageAllocator, PhysicalPageBlock};
pub use pool::{Handle, Pool};
pub use tables::{MasterTable, SlaveTable, SlaveTableManager};

/// log2 of the GPU page size.
pub const PAGE_SHIFT: u32 = 12;

/// GPU page size (4KB)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Index bits resolved by a slave table.
pub const SLAVE_BITS: u32 = 12;

/// Index bits resolved by the master table.
pub const MASTER_BITS: u32 = 8;

/// Shift of the slave index inside a GPU virtual address.
pub const SLAVE_SHIFT: u32 = PAGE_SHIFT;

/// Shift of the master index inside a GPU virtual address.
pub const MASTER_SHIFT: u32 = SLAVE_SHIFT + SLAVE_BITS;

/// Entries per slave table
pub const SLAVE_ENTRIES: u32 = 1 << SLAVE_BITS;

/// Entries in the master table
pub const MASTER_ENTRIES: u32 = 1 << MASTER_BITS;

/// Pages addressable through one context.
pub const TOTAL_PAGES: u32 = MASTER_ENTRIES * SLAVE_ENTRIES;

/// Page order of a slave table allocation (16KB).
pub const SLAVE_TABLE_ORDER: u8 = 2;

/// Page order of the master table allocation.
pub const MASTER_TABLE_ORDER: u8 = 0;

const _: () = assert!(MASTER_SHIFT + MASTER_BITS == 32, "GPU addresses are 32 bits wide");
const _: () = assert!(
    (SLAVE_ENTRIES as usize) * 4 == PAGE_SIZE << SLAVE_TABLE_ORDER,
    "slave table must fill its allocation exactly"
);
const _: () = assert!(
    (MASTER_ENTRIES as usize) * 4 <= PAGE_SIZE << MASTER_TABLE_ORDER,
    "master table must fit its allocation"
);
const _: () = assert!(TOTAL_PAGES == 1 << 20, "4GB of 4KB pages");
