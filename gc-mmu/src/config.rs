//! Device configuration

use core::time::Duration;

/// Pattern written over the safe zone so stray GPU accesses stand out.
pub const SAFE_ZONE_FILL: u32 = 0xDEAD_BEEF;

/// Page order of the safe zone.
pub const SAFE_ZONE_ORDER: u8 = 0;

/// Tunables chosen when a device is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmuConfig {
    /// Page order of the command buffer.
    pub command_buffer_order: u8,
    /// How long a flush waits for the GPU. `None` waits forever.
    pub flush_timeout: Option<Duration>,
}

impl MmuConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            command_buffer_order: 0,
            flush_timeout: None,
        }
    }

    #[must_use]
    pub const fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_command_buffer_order(mut self, order: u8) -> Self {
        self.command_buffer_order = order;
        self
    }
}

impl Default for MmuConfig {
    fn default() -> Self {
        Self::new()
    }
}
