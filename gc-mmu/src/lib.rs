//! GPU MMU core
//!
//! Ties the page-table and command-stream crates together into the objects
//! a driver works with:
//!
//! - [`device`]: The per-core [`MmuDevice`], its command session and the
//!   one-time MMU enable
//! - [`context`]: Address spaces that map and unmap physical pages
//! - [`flush`]: The TLB invalidation sequence
//! - [`config`]: Runtime tunables
//!
//! # Example
//!
//! ```ignore
//! let device = MmuDevice::new(pages, regs, Box::new(completion), MmuConfig::default())?;
//! let ctx = device.create_context()?;
//! let mapping = ctx.map_physical(&device, &PhysicalMemory::new(&frames, 0))?;
//! device.flush_tlb()?;
//! // ... GPU uses mapping.address() ...
//! ctx.unmap_physical(&device, &mapping)?;
//! device.destroy_context(ctx)?;
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod flush;
#[cfg(test)]
mod testing;

pub use config::MmuConfig;
pub use context::{ContextUsage, GpuMapping, MmuContext, PhysicalMemory};
pub use device::{CommandSession, ForeignContext, MmuDevice};
pub use error::MmuError;
pub use flush::TlbFlush;
