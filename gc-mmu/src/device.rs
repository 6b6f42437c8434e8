//! The MMU device
//!
//! One [`MmuDevice`] exists per GPU core. It owns the pieces every context
//! shares: the command buffer, the completion strategy, the safe zone and
//! the one-time hardware enable. Contexts are created and destroyed through
//! it and name it by id, so a context cannot be used on another core.
//!
//! ```text
//!            MmuDevice
//!  ┌────────────────────────────┐
//!  │ regs ─────────► MMIO window│
//!  │ cmdbuf ───────► 1 block    │◄── commands() session
//!  │ completion                 │◄── handle_interrupt()
//!  │ safe zone (after enable)   │
//!  │ arena record reservoir     │◄── destroyed contexts' pools
//!  └────────────────────────────┘
//!       ▲ create/destroy
//!       │
//!   MmuContext ─► master table, slave tables, arenas
//! ```

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem::ManuallyDrop;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use core::time::Duration;

use gc_cmd::registers::*;
use gc_cmd::{CommandBuffer, CommandWriter, Completion};
use gc_mmio::RegisterIo;
use gc_paging::{Arena, PA, PageAllocator, PhysicalPageBlock, Pool};
use spin::{Mutex, MutexGuard, Once};

use crate::config::{MmuConfig, SAFE_ZONE_FILL, SAFE_ZONE_ORDER};
use crate::context::MmuContext;
use crate::error::MmuError;

static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(1);

/// A GPU core's MMU and command front end.
pub struct MmuDevice<P: PageAllocator, R: RegisterIo> {
    /// Identity checked against every context handed in
    id: u32,
    /// Source of table, safe zone and command buffer pages
    pages: P,
    /// Host register window
    regs: R,
    config: MmuConfig,
    completion: Box<dyn Completion>,
    /// Taken out only when the device is dropped
    cmdbuf: ManuallyDrop<Mutex<CommandBuffer>>,
    /// Serialises the enable sequence
    enable_lock: Mutex<()>,
    /// Write-once: the hardware latches the first MMU_CONTROL enable
    enabled: AtomicBool,
    /// Page faulting accesses land on; kept until the device goes away
    safe_zone: Once<PhysicalPageBlock>,
    /// Arena record pools of destroyed contexts
    arena_records: Mutex<Vec<Pool<Arena>>>,
    /// Live contexts
    contexts: AtomicUsize,
    next_context_id: AtomicU32,
}

impl<P: PageAllocator, R: RegisterIo> MmuDevice<P, R> {
    /// Bring up the device: allocate the command buffer and unmask the
    /// completion interrupt.
    pub fn new(
        pages: P,
        regs: R,
        completion: Box<dyn Completion>,
        config: MmuConfig,
    ) -> Result<Self, MmuError> {
        let block = pages.alloc_pages(config.command_buffer_order)?;
        let cmdbuf = match CommandBuffer::new(block) {
            Ok(cmdbuf) => cmdbuf,
            Err((e, block)) => {
                pages.free_pages(block);
                return Err(e.into());
            }
        };

        regs.write32(HI_INTR_ENBL, COMPLETION_EVENT_BIT);

        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        log::info!("gpu mmu {}: command buffer {:?}", id, cmdbuf);

        Ok(Self {
            id,
            pages,
            regs,
            config,
            completion,
            cmdbuf: ManuallyDrop::new(Mutex::new(cmdbuf)),
            enable_lock: Mutex::new(()),
            enabled: AtomicBool::new(false),
            safe_zone: Once::new(),
            arena_records: Mutex::new(Vec::new()),
            contexts: AtomicUsize::new(0),
            next_context_id: AtomicU32::new(1),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn pages(&self) -> &P {
        &self.pages
    }

    #[inline]
    #[must_use]
    pub fn regs(&self) -> &R {
        &self.regs
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &MmuConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn completion(&self) -> &dyn Completion {
        &*self.completion
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Number of live contexts.
    #[inline]
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.load(Ordering::Acquire)
    }

    /// Physical address of the safe zone, once the MMU is enabled.
    #[must_use]
    pub fn safe_zone_address(&self) -> Option<PA> {
        self.safe_zone.get().map(PhysicalPageBlock::phys)
    }

    #[must_use]
    pub fn command_buffer_address(&self) -> u32 {
        self.cmdbuf.lock().address()
    }

    /// Lock the command buffer for building and flushing commands.
    ///
    /// Hold the session from the first `alloc` to the `flush` so no other
    /// caller's commands get mixed in. Creating a context while holding it
    /// deadlocks on the first create.
    pub fn commands(&self) -> CommandSession<'_> {
        CommandSession {
            buffer: self.cmdbuf.lock(),
            regs: &self.regs,
            completion: &*self.completion,
            timeout: self.config.flush_timeout,
        }
    }

    // -- Contexts

    /// Create an address space context.
    ///
    /// The first context also enables the MMU with its master table as the
    /// initial root.
    pub fn create_context(&self) -> Result<MmuContext, MmuError> {
        let ctx = MmuContext::create(self)?;

        if !self.is_enabled() {
            match self.enable(&ctx) {
                Ok(()) | Err(MmuError::AlreadyEnabled) => {}
                Err(e) => {
                    ctx.release(self);
                    return Err(e);
                }
            }
        }

        let live = self.contexts.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("gpu mmu {}: context {} created ({} live)", self.id, ctx.id(), live);
        Ok(ctx)
    }

    /// Tear down a context and return all its pages.
    ///
    /// A context of another device is handed back untouched.
    pub fn destroy_context(&self, ctx: MmuContext) -> Result<(), ForeignContext> {
        if ctx.device_id() != self.id {
            return Err(ForeignContext(ctx));
        }
        let id = ctx.id();
        ctx.release(self);
        let live = self.contexts.fetch_sub(1, Ordering::AcqRel) - 1;
        log::debug!("gpu mmu {}: context {} destroyed ({} live)", self.id, id, live);
        Ok(())
    }

    pub(crate) fn next_context_id(&self) -> u32 {
        self.next_context_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn take_arena_records(&self) -> Pool<Arena> {
        self.arena_records.lock().pop().unwrap_or_else(Pool::new)
    }

    pub(crate) fn return_arena_records(&self, records: Pool<Arena>) {
        let mut reservoir = self.arena_records.lock();
        if reservoir.try_reserve(1).is_ok() {
            reservoir.push(records);
        }
    }

    /// Pools waiting in the reservoir.
    #[must_use]
    pub fn reservoir_len(&self) -> usize {
        self.arena_records.lock().len()
    }

    // -- Enable

    /// Program the safe zone and `ctx`'s master table, then turn
    /// translation on.
    ///
    /// The hardware only honours the first enable, so any later call fails
    /// with [`MmuError::AlreadyEnabled`].
    pub fn enable(&self, ctx: &MmuContext) -> Result<(), MmuError> {
        if ctx.device_id() != self.id {
            return Err(MmuError::ForeignContext);
        }
        let _guard = self.enable_lock.lock();
        if self.is_enabled() {
            return Err(MmuError::AlreadyEnabled);
        }

        let safe_zone = self.safe_zone.try_call_once(|| -> Result<PhysicalPageBlock, MmuError> {
            let mut block = self.pages.alloc_pages(SAFE_ZONE_ORDER)?;
            if block.phys().to_u32().is_none() {
                self.pages.free_pages(block);
                return Err(MmuError::OutOfMemory);
            }
            block.fill_u32(SAFE_ZONE_FILL);
            Ok(block)
        })?;
        let safe_address = safe_zone.phys().value() as u32;

        let mut session = self.commands();
        session
            .alloc(16)?
            .load_state(MMU_SAFE_ADDRESS, safe_address)?
            .load_state(MMU_CONFIGURATION, ctx.configuration())?;
        session.flush()?;
        drop(session);

        self.regs.write32(MMU_CONTROL, MMU_CONTROL_ENABLE);
        self.enabled.store(true, Ordering::Release);
        log::info!(
            "gpu mmu {}: enabled, master {:#010x} safe zone {:#010x}",
            self.id,
            ctx.configuration() & MMU_CONFIGURATION_ADDRESS,
            safe_address
        );
        Ok(())
    }

    // -- Interrupts

    /// Acknowledge pending GPU events and complete a waiting flush.
    ///
    /// Called from the interrupt handler. Returns the acknowledged events.
    pub fn handle_interrupt(&self) -> u32 {
        let pending = self.regs.read32(HI_INTR_ACKNOWLEDGE);
        if pending & COMPLETION_EVENT_BIT != 0 {
            self.completion.signal();
        }
        let other = pending & !COMPLETION_EVENT_BIT;
        if other != 0 {
            log::trace!("gpu mmu {}: unclaimed events {:#010x}", self.id, other);
        }
        pending
    }
}

impl<P: PageAllocator, R: RegisterIo> Drop for MmuDevice<P, R> {
    fn drop(&mut self) {
        let live = self.context_count();
        if live != 0 {
            log::warn!("gpu mmu {}: dropped with {} live contexts", self.id, live);
        }
        // SAFETY: cmdbuf is not used again after this point
        let cmdbuf = unsafe { ManuallyDrop::take(&mut self.cmdbuf) };
        self.pages.free_pages(cmdbuf.into_inner().into_block());
        if let Some(block) = core::mem::replace(&mut self.safe_zone, Once::new()).try_into_inner() {
            self.pages.free_pages(block);
        }
    }
}

impl<P: PageAllocator, R: RegisterIo> core::fmt::Debug for MmuDevice<P, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmuDevice")
            .field("id", &self.id)
            .field("enabled", &self.is_enabled())
            .field("contexts", &self.context_count())
            .field("safe_zone", &self.safe_zone_address())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Command session
// =============================================================================

/// Exclusive access to the command buffer.
pub struct CommandSession<'d> {
    buffer: MutexGuard<'d, CommandBuffer>,
    regs: &'d dyn RegisterIo,
    completion: &'d dyn Completion,
    timeout: Option<Duration>,
}

impl CommandSession<'_> {
    /// Reserve `size` bytes of command space.
    pub fn alloc(&mut self, size: usize) -> Result<CommandWriter<'_>, MmuError> {
        Ok(self.buffer.alloc(size)?)
    }

    /// Submit what was built and wait for the GPU.
    pub fn flush(&mut self) -> Result<(), MmuError> {
        self.buffer.flush(self.regs, self.completion, self.timeout)?;
        Ok(())
    }
}

impl Deref for CommandSession<'_> {
    type Target = CommandBuffer;

    fn deref(&self) -> &CommandBuffer {
        &self.buffer
    }
}

// =============================================================================
// Errors
// =============================================================================

/// A context returned by [`MmuDevice::destroy_context`] because another
/// device created it.
pub struct ForeignContext(pub MmuContext);

impl core::fmt::Debug for ForeignContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ForeignContext(device {}, context {})", self.0.device_id(), self.0.id())
    }
}

impl core::fmt::Display for ForeignContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "context {} belongs to device {}", self.0.id(), self.0.device_id())
    }
}

impl From<ForeignContext> for MmuError {
    fn from(_: ForeignContext) -> Self {
        MmuError::ForeignContext
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, device_with, submitted_without_trailer};
    use gc_cmd::opcode::{Command, Decoder};
    use crate::flush::TlbFlush;
    use gc_cmd::{FakeCompletion, PollingCompletion};
    use gc_mmio::FakeRegisters;
    use gc_paging::HostPageAllocator;

    #[test]
    fn test_new_unmasks_completion_interrupt() {
        let dev = device();
        assert_eq!(dev.regs().writes(), [(HI_INTR_ENBL, COMPLETION_EVENT_BIT)]);
        assert!(!dev.is_enabled());
        assert_eq!(dev.pages().pages_live(), 1);
    }

    #[test]
    fn test_first_context_enables_mmu() {
        let dev = device();
        let ctx = dev.create_context().unwrap();

        assert!(dev.is_enabled());
        let safe = dev.safe_zone_address().unwrap().value() as u32;
        let words = submitted_without_trailer(&dev);
        let commands: Vec<_> = Decoder::new(&words).map(Result::unwrap).collect();
        assert_eq!(
            commands,
            [
                Command::LoadState { address: MMU_SAFE_ADDRESS, values: &[safe] },
                Command::LoadState { address: MMU_CONFIGURATION, values: &[ctx.configuration()] },
            ]
        );

        // The command stream is kicked before translation is switched on.
        let base = dev.command_buffer_address();
        assert_eq!(
            dev.regs().writes(),
            [
                (HI_INTR_ENBL, COMPLETION_EVENT_BIT),
                (FE_COMMAND_ADDRESS, base),
                (FE_COMMAND_CONTROL, FE_COMMAND_CONTROL_ENABLE | 4),
                (MMU_CONTROL, MMU_CONTROL_ENABLE),
            ]
        );
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_safe_zone_is_filled() {
        let dev = device();
        let ctx = dev.create_context().unwrap();
        let zone = dev.safe_zone.get().unwrap();
        assert!((0..zone.words()).all(|i| zone.read_u32(i) == SAFE_ZONE_FILL));
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_enable_happens_once() {
        let dev = device();
        let first = dev.create_context().unwrap();
        let second = dev.create_context().unwrap();

        assert_eq!(dev.regs().writes_to(MMU_CONTROL).len(), 1);
        assert_eq!(dev.context_count(), 2);

        let err = dev.enable(&second).unwrap_err();
        assert_eq!(err, MmuError::AlreadyEnabled);
        assert_eq!(err.errno(), -22);

        dev.destroy_context(first).unwrap();
        dev.destroy_context(second).unwrap();
        assert_eq!(dev.context_count(), 0);
        // Destroying every context leaves the MMU on.
        assert!(dev.is_enabled());
        assert!(dev.safe_zone_address().is_some());
    }

    #[test]
    fn test_enable_rejects_foreign_context() {
        let dev = device();
        let other = device();
        let ctx = other.create_context().unwrap();
        assert_eq!(dev.enable(&ctx), Err(MmuError::ForeignContext));
        other.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_create_failure_releases_master() {
        // Command buffer and master table fit, the safe zone does not.
        let dev = device_with(HostPageAllocator::with_limit(2), FakeCompletion::new());
        assert_eq!(dev.create_context().unwrap_err(), MmuError::OutOfMemory);
        assert_eq!(dev.pages().pages_live(), 1);
        assert_eq!(dev.context_count(), 0);
        assert!(!dev.is_enabled());
        assert_eq!(dev.reservoir_len(), 1);
    }

    #[test]
    fn test_create_fails_when_enable_times_out() {
        let dev = device_with(HostPageAllocator::new(), FakeCompletion::never());
        assert_eq!(dev.create_context().unwrap_err(), MmuError::Timeout);
        assert!(!dev.is_enabled());
        assert!(dev.regs().writes_to(MMU_CONTROL).is_empty());
        // The safe zone stays allocated for the next attempt.
        assert_eq!(dev.pages().pages_live(), 2);
    }

    #[test]
    fn test_destroy_reuses_arena_records() {
        let dev = device();
        let ctx = dev.create_context().unwrap();
        assert_eq!(dev.reservoir_len(), 0);

        dev.destroy_context(ctx).unwrap();
        assert_eq!(dev.reservoir_len(), 1);
        // Command buffer and safe zone remain.
        assert_eq!(dev.pages().pages_live(), 2);

        let ctx = dev.create_context().unwrap();
        assert_eq!(dev.reservoir_len(), 0);
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_destroy_hands_back_foreign_context() {
        let dev = device();
        let other = device();
        let ctx = other.create_context().unwrap();

        let ForeignContext(ctx) = dev.destroy_context(ctx).unwrap_err();
        assert_eq!(other.context_count(), 1);
        other.destroy_context(ctx).unwrap();
        assert_eq!(other.context_count(), 0);
    }

    #[test]
    fn test_drop_releases_device_pages() {
        let pages = HostPageAllocator::new();
        {
            let dev = MmuDevice::new(
                &pages,
                FakeRegisters::new(),
                Box::new(FakeCompletion::new()),
                MmuConfig::default(),
            )
            .unwrap();
            let ctx = dev.create_context().unwrap();
            dev.destroy_context(ctx).unwrap();
            assert_eq!(pages.pages_live(), 2);
        }
        assert_eq!(pages.pages_live(), 0);
    }

    fn test_clock() -> Duration {
        static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
        START.get_or_init(std::time::Instant::now).elapsed()
    }

    #[test]
    fn test_interrupt_completes_flush() {
        let regs = FakeRegisters::new();
        regs.preset(HI_INTR_ACKNOWLEDGE, COMPLETION_EVENT_BIT | 1 << 4);
        regs.clear_on_read(HI_INTR_ACKNOWLEDGE);
        let dev = MmuDevice::new(
            HostPageAllocator::new(),
            regs,
            Box::new(PollingCompletion::new(test_clock, Duration::ZERO)),
            MmuConfig::default(),
        )
        .unwrap();

        dev.completion().arm();
        assert_eq!(dev.handle_interrupt(), 0x11);
        assert!(dev.completion().wait(Some(Duration::from_millis(1)), &mut |_| {}).is_ok());

        // Events were acknowledged by the read.
        dev.completion().arm();
        assert_eq!(dev.handle_interrupt(), 0);
        assert!(dev.completion().wait(Some(Duration::from_millis(1)), &mut |_| {}).is_err());
    }

    #[test]
    fn test_command_buffer_order_is_honoured() {
        let pages = HostPageAllocator::new();
        let config = MmuConfig::new().with_command_buffer_order(2);
        let completion = Box::new(FakeCompletion::new());
        let dev = MmuDevice::new(&pages, FakeRegisters::new(), completion, config).unwrap();
        assert_eq!(pages.pages_live(), 4);
        assert_eq!(dev.commands().capacity(), 4 * 4096 - gc_cmd::TRAILER_BYTES);
    }

    #[test]
    fn test_oversized_command_buffer_rejected() {
        let pages = HostPageAllocator::new();
        let config = MmuConfig::new().with_command_buffer_order(7);
        let completion = Box::new(FakeCompletion::new());
        let err = MmuDevice::new(&pages, FakeRegisters::new(), completion, config).unwrap_err();
        assert_eq!(err, MmuError::InvalidBuffer);
        assert_eq!(pages.pages_live(), 0);
    }

    #[test]
    fn test_flush_timeout_bounds_wait() {
        let config = MmuConfig::new().with_flush_timeout(Duration::from_millis(5));
        let dev = MmuDevice::new(
            HostPageAllocator::new(),
            FakeRegisters::new(),
            Box::new(PollingCompletion::new(test_clock, Duration::ZERO)),
            config,
        )
        .unwrap();

        // Nothing signals the completion, so only the timeout ends the wait.
        assert_eq!(dev.flush_tlb(), Err(MmuError::Timeout));
        assert_eq!(dev.commands().accumulated(), TlbFlush::BYTES);
    }

    #[test]
    fn test_session_spans_build_and_flush() {
        let dev = device();
        let mut session = dev.commands();
        session.alloc(8).unwrap().load_state(GL_FLUSH_CACHE, GL_FLUSH_CACHE_COLOR).unwrap();
        assert_eq!(session.accumulated(), 8);
        session.flush().unwrap();
        assert_eq!(session.accumulated(), 0);
        assert_eq!(session.submitted().len(), 5);
    }
}
