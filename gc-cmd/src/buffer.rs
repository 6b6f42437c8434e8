//! The command buffer
//!
//! A single page-block of command words, filled front to back and submitted
//! to the front end in one go. Every flush appends a fixed trailer that
//! raises the completion event and ends the stream, so the usable capacity
//! is the block size minus [`TRAILER_BYTES`].
//!
//! ```text
//! phys ─►┌──────────────────────────────┐
//!        │ commands (accumulated bytes) │ ◄── alloc() hands out writers here
//!        ├──────────────────────────────┤ ◄── offset
//!        │ free                         │
//!        ├──────────────────────────────┤ ◄── capacity()
//!        │ trailer reserve (12 bytes)   │
//!        └──────────────────────────────┘
//! ```

use alloc::vec::Vec;
use core::time::Duration;

use gc_mmio::{RegisterIo, barrier};
use gc_paging::PhysicalPageBlock;
use zerocopy::FromBytes;
use zerocopy::byteorder::{LittleEndian, U32};

use crate::completion::Completion;
use crate::error::CmdError;
use crate::opcode::{self, Decoder, Recipient};
use crate::registers::*;

/// Bytes appended by every flush: LOAD_STATE GL_EVENT, event value, END.
pub const TRAILER_BYTES: usize = 12;

/// Largest stream the front end fetches in one go, trailer included.
pub const MAX_BUFFER_BYTES: usize = FE_COMMAND_CONTROL_PREFETCH_MASK as usize * 8;

/// Command buffer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Nothing reserved since the last flush.
    Ready,
    /// Commands are waiting to be flushed.
    Accumulating,
}

/// Writes command words into a reserved span of GPU-visible memory.
pub struct CommandWriter<'a> {
    words: &'a mut [U32<LittleEndian>],
    base: u32,
    pos: usize,
}

impl<'a> CommandWriter<'a> {
    /// Writer over `words`, whose first word the GPU sees at `base`.
    #[must_use]
    pub fn new(words: &'a mut [U32<LittleEndian>], base: u32) -> Self {
        Self { words, base, pos: 0 }
    }

    /// GPU address of the first word.
    #[inline]
    #[must_use]
    pub fn address(&self) -> u32 {
        self.base
    }

    /// Size of the reservation in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words.len() * 4
    }

    #[inline]
    #[must_use]
    pub fn written(&self) -> usize {
        self.pos * 4
    }

    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.written()
    }

    /// Append one raw word.
    pub fn word(&mut self, value: u32) -> Result<&mut Self, CmdError> {
        let slot = self
            .words
            .get_mut(self.pos)
            .ok_or(CmdError::Overflow { offset: self.pos * 4 })?;
        *slot = U32::new(value);
        self.pos += 1;
        Ok(self)
    }

    fn ensure(&self, words: usize) -> Result<(), CmdError> {
        if self.pos + words > self.words.len() {
            return Err(CmdError::Overflow { offset: self.pos * 4 });
        }
        Ok(())
    }

    /// LOAD_STATE of a single value.
    pub fn load_state(&mut self, address: u32, value: u32) -> Result<&mut Self, CmdError> {
        self.load_states(address, &[value])
    }

    /// LOAD_STATE of consecutive values, padded to 64 bits.
    pub fn load_states(&mut self, address: u32, values: &[u32]) -> Result<&mut Self, CmdError> {
        let total = opcode::load_state_words(values.len());
        self.ensure(total)?;
        self.word(opcode::load_state(address, values.len()))?;
        for &value in values {
            self.word(value)?;
        }
        for _ in 1 + values.len()..total {
            self.word(0)?;
        }
        Ok(self)
    }

    /// Stall `to` until `from` reaches this point.
    pub fn stall(&mut self, from: Recipient, to: Recipient) -> Result<&mut Self, CmdError> {
        self.ensure(2)?;
        self.word(opcode::STALL)?.word(opcode::sync_token(from, to))
    }

    /// Arm the semaphore between `from` and `to`, then stall on it.
    pub fn semaphore_stall(
        &mut self,
        from: Recipient,
        to: Recipient,
    ) -> Result<&mut Self, CmdError> {
        self.ensure(4)?;
        self.load_state(GL_SEMAPHORE_TOKEN, opcode::sync_token(from, to))?;
        self.stall(from, to)
    }

    /// Continue fetching `prefetch` 64-bit units at `address`.
    pub fn link(&mut self, prefetch: u16, address: u32) -> Result<&mut Self, CmdError> {
        self.ensure(2)?;
        self.word(opcode::link(prefetch))?.word(address)
    }

    pub fn end(&mut self) -> Result<&mut Self, CmdError> {
        self.word(opcode::END)
    }

    pub fn nop(&mut self) -> Result<&mut Self, CmdError> {
        self.word(opcode::NOP)
    }
}

/// The device's single command buffer.
pub struct CommandBuffer {
    block: PhysicalPageBlock,
    base: u32,
    offset: usize,
    accumulated: usize,
    submitted: usize,
}

impl CommandBuffer {
    /// Use `block` as the command buffer.
    ///
    /// The block is handed back if the GPU cannot address it, cannot fetch
    /// all of it with one prefetch count or it cannot hold the trailer.
    pub fn new(block: PhysicalPageBlock) -> Result<Self, (CmdError, PhysicalPageBlock)> {
        let Some(base) = block.phys().to_u32() else {
            return Err((CmdError::InvalidBuffer, block));
        };
        if block.size() <= TRAILER_BYTES || block.size() > MAX_BUFFER_BYTES {
            return Err((CmdError::InvalidBuffer, block));
        }
        Ok(Self {
            block,
            base,
            offset: 0,
            accumulated: 0,
            submitted: 0,
        })
    }

    /// Give the backing block back.
    #[must_use]
    pub fn into_block(self) -> PhysicalPageBlock {
        self.block
    }

    /// GPU address of the buffer.
    #[inline]
    #[must_use]
    pub fn address(&self) -> u32 {
        self.base
    }

    /// Bytes available to commands after a flush.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.block.size() - TRAILER_BYTES
    }

    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity() - self.offset
    }

    /// Bytes reserved since the last flush.
    #[inline]
    #[must_use]
    pub fn accumulated(&self) -> usize {
        self.accumulated
    }

    #[must_use]
    pub fn state(&self) -> BufferState {
        if self.accumulated == 0 {
            BufferState::Ready
        } else {
            BufferState::Accumulating
        }
    }

    /// Reserve `size` bytes, rounded up to whole words.
    ///
    /// Fails without touching any counter if the buffer is too full.
    pub fn alloc(&mut self, size: usize) -> Result<CommandWriter<'_>, CmdError> {
        let rounded = size.next_multiple_of(4);
        let available = self.available();
        if rounded > available {
            return Err(CmdError::OutOfSpace {
                requested: rounded,
                available,
            });
        }
        let start = self.offset;
        self.offset += rounded;
        self.accumulated += rounded;
        self.writer(start, rounded)
    }

    fn writer(&mut self, start: usize, len: usize) -> Result<CommandWriter<'_>, CmdError> {
        let base = self.base + start as u32;
        let bytes = &mut self.block.as_bytes_mut()[start..start + len];
        let words =
            <[U32<LittleEndian>]>::mut_from_bytes(bytes).map_err(|_| CmdError::InvalidBuffer)?;
        Ok(CommandWriter::new(words, base))
    }

    /// Submit everything accumulated and wait for the GPU to finish it.
    ///
    /// On success the buffer is empty again. On a timeout the buffer is left
    /// as it was, since the GPU may still be fetching from it.
    pub fn flush(
        &mut self,
        regs: &dyn RegisterIo,
        completion: &dyn Completion,
        timeout: Option<Duration>,
    ) -> Result<(), CmdError> {
        let trailer = self.offset;
        self.writer(trailer, TRAILER_BYTES)?
            .load_state(GL_EVENT, COMPLETION_EVENT | GL_EVENT_FROM_PE)?
            .end()?;

        let bytes = trailer + TRAILER_BYTES;
        let prefetch = bytes.div_ceil(8) as u32;
        debug_assert!(prefetch <= FE_COMMAND_CONTROL_PREFETCH_MASK);

        completion.arm();
        barrier::write_barrier();
        barrier::device_barrier();
        regs.write32(FE_COMMAND_ADDRESS, self.base);
        regs.write32(FE_COMMAND_CONTROL, FE_COMMAND_CONTROL_ENABLE | prefetch);
        self.submitted = bytes;
        log::trace!("cmdbuf: kicked {} bytes at {:#010x}", bytes, self.base);

        let this = &*self;
        completion.wait(timeout, &mut |waited| this.report_progress(regs, waited))?;

        barrier::read_barrier();
        self.offset = 0;
        self.accumulated = 0;
        Ok(())
    }

    /// Words of the most recent submission, trailer included.
    #[must_use]
    pub fn submitted(&self) -> Vec<u32> {
        let bytes = &self.block.as_bytes()[..self.submitted];
        <[U32<LittleEndian>]>::ref_from_bytes(bytes)
            .map(|words| words.iter().map(|w| w.get()).collect())
            .unwrap_or_default()
    }

    /// Log front-end state and the stream the GPU is chewing on.
    pub fn report_progress(&self, regs: &dyn RegisterIo, waited: Duration) {
        let idle = regs.read32(HI_IDLE_STATE);
        let dma_state = regs.read32(FE_DMA_DEBUG_STATE);
        let dma_address = regs.read32(FE_DMA_ADDRESS);
        let high = regs.read32(FE_DMA_HIGH);
        let low = regs.read32(FE_DMA_LOW);
        log::warn!(
            "GPU busy for {:?}: idle {:#010x} dma state {:#010x} addr {:#010x} cmd {:#010x}:{:#010x}",
            waited,
            idle,
            dma_state,
            dma_address,
            high,
            low,
        );
        let words = self.submitted();
        for (index, command) in Decoder::new(&words).enumerate() {
            log::debug!("  [{:3}] {:?}", index, command);
        }
    }
}

impl core::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("address", &format_args!("{:#010x}", self.base))
            .field("available", &self.available())
            .field("accumulated", &self.accumulated)
            .finish()
    }
}
