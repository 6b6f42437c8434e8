//! GPU register and state definitions
//!
//! Two address spaces appear here. Host registers are byte offsets into the
//! MMIO window and are written through `RegisterIo`. Pipeline states are
//! byte addresses programmed from the command stream with LOAD_STATE.

// -- Host Register Offsets

/// Idle status of each pipeline module
pub const HI_IDLE_STATE: usize = 0x0004;
/// Pending interrupt events; reading acknowledges them
pub const HI_INTR_ACKNOWLEDGE: usize = 0x0010;
/// Interrupt enable mask
pub const HI_INTR_ENBL: usize = 0x0014;
/// MMU control
pub const MMU_CONTROL: usize = 0x0388;
/// Front-end command buffer physical address
pub const FE_COMMAND_ADDRESS: usize = 0x0654;
/// Front-end prefetch length and kick
pub const FE_COMMAND_CONTROL: usize = 0x0658;
/// Front-end DMA engine state
pub const FE_DMA_DEBUG_STATE: usize = 0x0660;
/// Address the front end is fetching
pub const FE_DMA_ADDRESS: usize = 0x0664;
/// Low word of the command being fetched
pub const FE_DMA_LOW: usize = 0x0668;
/// High word of the command being fetched
pub const FE_DMA_HIGH: usize = 0x066C;

// -- MMU_CONTROL Bits

/// Turn translation on. Write-once: the hardware ignores later writes.
pub const MMU_CONTROL_ENABLE: u32 = 1 << 0;

// -- FE_COMMAND_CONTROL Bits

/// Prefetch length in 64-bit units
pub const FE_COMMAND_CONTROL_PREFETCH_MASK: u32 = 0xFFFF;
/// Start fetching
pub const FE_COMMAND_CONTROL_ENABLE: u32 = 1 << 16;

// -- Pipeline State Addresses

/// Physical address faulting accesses are redirected to
pub const MMU_SAFE_ADDRESS: u32 = 0x0180;
/// Master table address, table mode and TLB flush
pub const MMU_CONFIGURATION: u32 = 0x0184;
/// Event raised toward the host
pub const GL_EVENT: u32 = 0x3804;
/// Semaphore between pipeline modules
pub const GL_SEMAPHORE_TOKEN: u32 = 0x3808;
/// Cache flush request
pub const GL_FLUSH_CACHE: u32 = 0x380C;

// -- MMU_CONFIGURATION Bits

/// Master table holds 256 entries (1KB)
pub const MMU_CONFIGURATION_MODE_1K: u32 = 1 << 0;
/// Leave MODE unchanged by this write
pub const MMU_CONFIGURATION_MODE_MASK: u32 = 1 << 3;
/// Invalidate the TLB
pub const MMU_CONFIGURATION_FLUSH: u32 = 1 << 4;
/// Leave FLUSH unchanged by this write
pub const MMU_CONFIGURATION_FLUSH_MASK: u32 = 1 << 7;
/// Leave ADDRESS unchanged by this write
pub const MMU_CONFIGURATION_ADDRESS_MASK: u32 = 1 << 8;
/// Master table physical address [31:10]
pub const MMU_CONFIGURATION_ADDRESS: u32 = 0xFFFF_FC00;

// -- GL_EVENT Bits

/// Event number reported in HI_INTR_ACKNOWLEDGE
pub const GL_EVENT_ID_MASK: u32 = 0x1F;
/// Raise once the front end reaches the event
pub const GL_EVENT_FROM_FE: u32 = 1 << 5;
/// Raise once the pixel engine drains up to the event
pub const GL_EVENT_FROM_PE: u32 = 1 << 6;

// -- GL_FLUSH_CACHE Bits

pub const GL_FLUSH_CACHE_DEPTH: u32 = 1 << 0;
pub const GL_FLUSH_CACHE_COLOR: u32 = 1 << 1;

/// Event id used to signal command buffer completion.
pub const COMPLETION_EVENT: u32 = 0;

/// `HI_INTR_ACKNOWLEDGE` bit reporting [`COMPLETION_EVENT`].
pub const COMPLETION_EVENT_BIT: u32 = 1 << COMPLETION_EVENT;
