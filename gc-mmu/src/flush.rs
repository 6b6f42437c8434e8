//! TLB invalidation sequence
//!
//! Translation changes only become visible to the GPU after its TLB is
//! flushed. The flush must not overtake rendering still in flight, so the
//! caches are flushed and the front end stalls on the pixel engine both
//! before and after the MMU_CONFIGURATION write:
//!
//! ```text
//! LOAD_STATE GL_FLUSH_CACHE        depth | color
//! LOAD_STATE GL_SEMAPHORE_TOKEN    FE -> PE
//! STALL                            FE -> PE
//! LOAD_STATE MMU_CONFIGURATION     mode mask | address mask | flush
//! LOAD_STATE GL_SEMAPHORE_TOKEN    FE -> PE
//! STALL                            FE -> PE
//! LINK                             prefetch, address
//! ```
//!
//! The sequence ends in a LINK so it can be spliced in front of any stream.

use gc_cmd::registers::*;
use gc_cmd::{CommandWriter, Recipient, TRAILER_BYTES};
use gc_mmio::RegisterIo;
use gc_paging::PageAllocator;

use crate::device::MmuDevice;
use crate::error::MmuError;

/// MMU_CONFIGURATION write that flushes the TLB and leaves mode and
/// address untouched.
const TLB_FLUSH_CONFIGURATION: u32 =
    MMU_CONFIGURATION_MODE_MASK | MMU_CONFIGURATION_ADDRESS_MASK | MMU_CONFIGURATION_FLUSH;

/// Emitter for the TLB flush sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlbFlush;

impl TlbFlush {
    /// Size of the sequence in bytes.
    pub const BYTES: usize = 56;

    /// Bytes a caller must reserve before calling [`emit`](Self::emit).
    #[inline]
    #[must_use]
    pub const fn required_bytes() -> usize {
        Self::BYTES
    }

    /// Write the sequence, continuing at `link_address` afterwards.
    ///
    /// `link_prefetch` is the length of the target stream in 64-bit units.
    pub fn emit(
        writer: &mut CommandWriter<'_>,
        link_prefetch: u16,
        link_address: u32,
    ) -> Result<(), MmuError> {
        if writer.remaining() < Self::BYTES {
            return Err(MmuError::OutOfMemory);
        }
        writer
            .load_state(GL_FLUSH_CACHE, GL_FLUSH_CACHE_DEPTH | GL_FLUSH_CACHE_COLOR)?
            .semaphore_stall(Recipient::FrontEnd, Recipient::PixelEngine)?
            .load_state(MMU_CONFIGURATION, TLB_FLUSH_CONFIGURATION)?
            .semaphore_stall(Recipient::FrontEnd, Recipient::PixelEngine)?
            .link(link_prefetch, link_address)?;
        Ok(())
    }
}

impl<P: PageAllocator, R: RegisterIo> MmuDevice<P, R> {
    /// Flush the GPU TLB now and wait for it to finish.
    ///
    /// The sequence links to the flush trailer placed right behind it, so
    /// the stream completes as usual.
    pub fn flush_tlb(&self) -> Result<(), MmuError> {
        let mut session = self.commands();
        {
            let mut writer = session.alloc(TlbFlush::required_bytes())?;
            let next = writer.address() + TlbFlush::BYTES as u32;
            let prefetch = TRAILER_BYTES.div_ceil(8) as u16;
            TlbFlush::emit(&mut writer, prefetch, next)?;
        }
        session.flush()?;
        log::trace!("TLB flushed");
        Ok(())
    }
}
