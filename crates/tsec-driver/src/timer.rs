//! Millisecond timer and the single poll-until primitive.
//!
//! Every wait in the protocol goes through [`wait_on`] (bounded) or
//! [`spin_until`] (unbounded). The caller names the [`WaitStage`], which
//! decides the [`TsecError`] returned when the deadline passes, so the four
//! bounded polls share one loop but keep distinct error codes.

use crate::error::{Result, TsecError};
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Monotonic time source used for busy-wait deadlines.
pub trait Timer: Debug + Send + Sync {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;

    /// Busy-wait for at least `us` microseconds.
    fn delay_us(&self, us: u64);
}

/// [`Timer`] on top of [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemTimer {
    origin: Instant,
}

impl SystemTimer {
    /// Start a timer at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for SystemTimer {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay_us(&self, us: u64) {
        let until = Instant::now() + Duration::from_micros(us);
        while Instant::now() < until {
            std::hint::spin_loop();
        }
    }
}

/// Which bounded poll expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    /// DMA idle before the first window.
    DmaConfigure,
    /// DMA idle after the window at this IMEM offset.
    DmaWindow(u32),
    /// DMA idle after CPU start.
    Boot,
    /// Nonzero status from the firmware.
    Execution,
}

impl WaitStage {
    /// Error reported when this stage's deadline passes.
    pub const fn timeout(self, waited_ms: u64) -> TsecError {
        match self {
            Self::DmaConfigure => TsecError::ConfigurationTimeout { waited_ms },
            Self::DmaWindow(offset) => TsecError::TransferTimeout { offset, waited_ms },
            Self::Boot => TsecError::BootTimeout { waited_ms },
            Self::Execution => TsecError::ExecutionTimeout { waited_ms },
        }
    }
}

/// Poll `cond` until it yields `Some`, or fail once `timeout` has passed.
///
/// The condition is always checked before the deadline, so a condition
/// that is already true succeeds even with a zero timeout.
///
/// # Errors
///
/// Returns `stage.timeout(..)` when the deadline passes, or the first error
/// `cond` returns.
pub fn wait_on<T>(
    timer: &dyn Timer,
    stage: WaitStage,
    timeout: Duration,
    mut cond: impl FnMut() -> Result<Option<T>>,
) -> Result<T> {
    let start = timer.now_ms();
    let deadline = start.saturating_add(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));

    loop {
        if let Some(value) = cond()? {
            return Ok(value);
        }
        let now = timer.now_ms();
        if now > deadline {
            return Err(stage.timeout(now - start));
        }
        std::hint::spin_loop();
    }
}

/// Poll `cond` until it yields `Some`, with no deadline.
///
/// Only for waits the caller has explicitly accepted may never end.
///
/// # Errors
///
/// Returns the first error `cond` returns.
pub fn spin_until<T>(mut cond: impl FnMut() -> Result<Option<T>>) -> Result<T> {
    loop {
        if let Some(value) = cond()? {
            return Ok(value);
        }
        std::hint::spin_loop();
    }
}
