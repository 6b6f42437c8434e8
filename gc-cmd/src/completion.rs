//! Submission completion
//!
//! A flush blocks until the GPU raises the completion event at the end of
//! the stream. How the waiter learns about the event is platform policy, so
//! it sits behind [`Completion`]:
//!
//! - [`PollingCompletion`]: spin on a flag set from the interrupt path,
//!   logging GPU state periodically while waiting
//! - [`WaitQueueCompletion`]: sleep on a platform wait queue
//! - `FakeCompletion`: scripted outcome for tests (feature `fake`)
//!
//! The strategy is chosen at runtime by handing one to the device.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use crate::error::CmdError;

/// Await-with-timeout interface shared by every completion strategy.
pub trait Completion: Send + Sync {
    /// Prepare for a new submission. Called before the GPU is kicked.
    fn arm(&self);

    /// Record that the GPU reached the completion event.
    ///
    /// Called from interrupt context.
    fn signal(&self);

    /// Block until [`signal`](Self::signal), or until `timeout` has passed.
    ///
    /// `progress` may be invoked while waiting with the time waited so far.
    fn wait(
        &self,
        timeout: Option<Duration>,
        progress: &mut dyn FnMut(Duration),
    ) -> Result<(), CmdError>;
}

// -- Polling

/// Monotonic clock used by [`PollingCompletion`].
pub type Clock = fn() -> Duration;

/// Busy-polls a flag set by [`Completion::signal`].
pub struct PollingCompletion {
    done: AtomicBool,
    clock: Clock,
    report_every: Duration,
}

impl PollingCompletion {
    /// Poll using `clock`, reporting progress every `report_every`.
    #[must_use]
    pub const fn new(clock: Clock, report_every: Duration) -> Self {
        Self {
            done: AtomicBool::new(false),
            clock,
            report_every,
        }
    }
}

impl Completion for PollingCompletion {
    fn arm(&self) {
        self.done.store(false, Ordering::Release);
    }

    fn signal(&self) {
        self.done.store(true, Ordering::Release);
    }

    fn wait(
        &self,
        timeout: Option<Duration>,
        progress: &mut dyn FnMut(Duration),
    ) -> Result<(), CmdError> {
        let start = (self.clock)();
        let mut next_report = self.report_every;

        while !self.done.load(Ordering::Acquire) {
            let waited = (self.clock)().saturating_sub(start);
            if let Some(limit) = timeout
                && waited >= limit
            {
                log::error!("completion poll timed out after {:?}", waited);
                return Err(CmdError::Timeout { waited });
            }
            if !self.report_every.is_zero() && waited >= next_report {
                progress(waited);
                next_report += self.report_every;
            }
            core::hint::spin_loop();
        }
        Ok(())
    }
}

// -- Wait queue

/// Platform sleep/wake primitive.
pub trait WaitQueue: Send + Sync {
    /// Sleep until `ready` returns true or `timeout` passes.
    ///
    /// Returns the final value of `ready`.
    fn wait_until(&self, ready: &dyn Fn() -> bool, timeout: Option<Duration>) -> bool;

    /// Wake every sleeper so it re-checks its condition.
    fn wake_all(&self);
}

/// Sleeps on a [`WaitQueue`] until signalled.
pub struct WaitQueueCompletion<Q> {
    done: AtomicBool,
    queue: Q,
}

impl<Q: WaitQueue> WaitQueueCompletion<Q> {
    #[must_use]
    pub const fn new(queue: Q) -> Self {
        Self {
            done: AtomicBool::new(false),
            queue,
        }
    }
}

impl<Q: WaitQueue> Completion for WaitQueueCompletion<Q> {
    fn arm(&self) {
        self.done.store(false, Ordering::Release);
    }

    fn signal(&self) {
        self.done.store(true, Ordering::Release);
        self.queue.wake_all();
    }

    fn wait(
        &self,
        timeout: Option<Duration>,
        _progress: &mut dyn FnMut(Duration),
    ) -> Result<(), CmdError> {
        if self.queue.wait_until(&|| self.done.load(Ordering::Acquire), timeout) {
            return Ok(());
        }
        let waited = timeout.unwrap_or_default();
        log::error!("completion wait timed out after {:?}", waited);
        Err(CmdError::Timeout { waited })
    }
}

// -- Fake

/// Scripted completion for tests.
#[cfg(any(test, feature = "fake"))]
pub struct FakeCompletion {
    arms: core::sync::atomic::AtomicUsize,
    waits: core::sync::atomic::AtomicUsize,
    progress_reports: usize,
    completes: bool,
}

#[cfg(any(test, feature = "fake"))]
impl FakeCompletion {
    /// Every wait succeeds immediately.
    #[must_use]
    pub const fn new() -> Self {
        Self::scripted(true, 0)
    }

    /// Every wait times out.
    #[must_use]
    pub const fn never() -> Self {
        Self::scripted(false, 0)
    }

    /// Every wait reports progress `reports` times, then succeeds.
    #[must_use]
    pub const fn with_progress(reports: usize) -> Self {
        Self::scripted(true, reports)
    }

    const fn scripted(completes: bool, progress_reports: usize) -> Self {
        Self {
            arms: core::sync::atomic::AtomicUsize::new(0),
            waits: core::sync::atomic::AtomicUsize::new(0),
            progress_reports,
            completes,
        }
    }

    #[must_use]
    pub fn arms(&self) -> usize {
        self.arms.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::Acquire)
    }
}

#[cfg(any(test, feature = "fake"))]
impl Default for FakeCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "fake"))]
impl Completion for FakeCompletion {
    fn arm(&self) {
        self.arms.fetch_add(1, Ordering::AcqRel);
    }

    fn signal(&self) {}

    fn wait(
        &self,
        timeout: Option<Duration>,
        progress: &mut dyn FnMut(Duration),
    ) -> Result<(), CmdError> {
        self.waits.fetch_add(1, Ordering::AcqRel);
        for n in 1..=self.progress_reports {
            progress(Duration::from_millis(n as u64));
        }
        if self.completes {
            Ok(())
        } else {
            Err(CmdError::Timeout {
                waited: timeout.unwrap_or_default(),
            })
        }
    }
}
