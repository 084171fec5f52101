//! The bracketed TSEC operation.
//!
//! ```text
//! Idle → ClocksUp → FirmwareLoaded → Running → {Succeeded, Faulted, TimedOut}
//!                                                   Succeeded → Extracted
//!                                                          ↓
//!                                        ClocksDown (Bracket dropped) → Idle
//! ```
//!
//! [`Tsec::open`] returns a [`Bracket`] that owns the clocks and the scratch
//! buffer. Each stage method checks the bracket is in the state it expects,
//! so stages cannot run out of order and the key is read out at most once.
//! A failing stage moves the bracket to a terminal state; dropping the
//! bracket, on any path, gates the clocks off. [`Tsec::query`] runs every stage in one call.

use crate::clock::{self, ClockSet, ClocksUp};
use crate::config::QueryConfig;
use crate::dma::{DmaLoader, LoadMetrics, ScratchBuffer};
use crate::error::{Result, TsecError};
use crate::exec::{self, Completion, EngineSnapshot, Mailboxes};
use crate::extract::{self, ResultKey, KEY_LEN};
use crate::soc::Soc;
use crate::timer::{SystemTimer, Timer};
use std::fmt;
use tracing::{debug, info, warn};

/// Offsets into the boot package the firmware was taken from.
///
/// Carried for the caller; the driver does not interpret them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackageOffsets {
    /// Offset of the second-stage loader inside the package.
    pub pkg11_offset: u32,
    /// Load base of the secure monitor.
    pub secmon_base: u32,
}

/// Caller-owned input and output of one [`Tsec::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext<'fw> {
    /// Firmware image, never modified.
    pub firmware: &'fw [u8],
    /// Optional package metadata.
    pub package: Option<PackageOffsets>,
    /// Status mailbox when the bracket ended.
    pub status: u32,
    /// Command-error word when the bracket ended.
    pub cmd_err: u32,
    /// Exception info when the bracket ended.
    pub exception_info: u32,
}

impl<'fw> ExecutionContext<'fw> {
    /// Context for `firmware` with zeroed outputs.
    pub const fn new(firmware: &'fw [u8]) -> Self {
        Self {
            firmware,
            package: None,
            status: 0,
            cmd_err: 0,
            exception_info: 0,
        }
    }

    /// Attach package metadata.
    #[must_use]
    pub const fn with_package(mut self, package: PackageOffsets) -> Self {
        self.package = Some(package);
        self
    }

    fn record(&mut self, snapshot: EngineSnapshot) {
        self.status = snapshot.status;
        self.cmd_err = snapshot.cmd_err;
        self.exception_info = snapshot.exception_info;
    }
}

/// Where a [`Bracket`] is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketState {
    /// Clocks running, nothing loaded.
    ClocksUp,
    /// Firmware in IMEM.
    FirmwareLoaded,
    /// CPU started.
    Running,
    /// Firmware reported the success sentinel.
    Succeeded,
    /// Key read out and the side channel cleared.
    Extracted,
    /// A stage failed for a reason other than a timeout.
    Faulted,
    /// A bounded poll expired.
    TimedOut,
}

impl BracketState {
    /// Short lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ClocksUp => "clocks-up",
            Self::FirmwareLoaded => "firmware-loaded",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Extracted => "extracted",
            Self::Faulted => "faulted",
            Self::TimedOut => "timed-out",
        }
    }

    /// `true` once no further stage can run.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Extracted | Self::Faulted | Self::TimedOut
        )
    }
}

impl fmt::Display for BracketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// TSEC driver handle.
///
/// Owns the register blocks and the time source. The engine is a
/// singleton: only one [`Bracket`] can be open at a time, which the borrow
/// in [`Tsec::open`] enforces.
#[derive(Debug)]
pub struct Tsec {
    soc: Soc,
    timer: Box<dyn Timer>,
    config: QueryConfig,
}

impl Tsec {
    /// Create a driver over `soc`.
    pub fn new(soc: Soc, timer: Box<dyn Timer>, config: QueryConfig) -> Self {
        Self { soc, timer, config }
    }

    /// Create a driver using wall-clock time.
    pub fn with_system_timer(soc: Soc, config: QueryConfig) -> Self {
        Self::new(soc, Box::new(SystemTimer::new()), config)
    }

    /// Register blocks.
    pub const fn soc(&self) -> &Soc {
        &self.soc
    }

    /// Active configuration.
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Bring the clocks up and allocate scratch memory.
    ///
    /// # Errors
    ///
    /// Propagates clock sequencing errors.
    pub fn open(&mut self) -> Result<Bracket<'_>> {
        let clocks = clock::acquire(&self.soc, self.timer.as_ref(), ClockSet::TSEC)?;
        debug!("TSEC bracket open");
        Ok(Bracket {
            soc: &self.soc,
            timer: self.timer.as_ref(),
            config: &self.config,
            scratch: ScratchBuffer::new(self.config.scratch_capacity),
            state: BracketState::ClocksUp,
            clocks,
        })
    }

    /// Load, boot and wait on the firmware in `ctx`, then extract the
    /// derived key into `out_key`.
    ///
    /// `key_version` goes to the boot-key-version mailbox unless the
    /// configuration supplies an explicit mailbox pair. `out_key` is written
    /// only on success. Once the clocks are up, `ctx` receives the engine's
    /// status, command-error and exception-info words on every path. Clocks
    /// are down when this returns.
    ///
    /// # Errors
    ///
    /// Returns the error of the first stage that failed. A teardown error is
    /// only reported if every stage succeeded.
    pub fn query(
        &mut self,
        out_key: &mut [u8; KEY_LEN],
        key_version: u8,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        let mailboxes = match self.config.mailboxes {
            Some([mailbox0, mailbox1]) => Mailboxes::Handshake { mailbox0, mailbox1 },
            None => Mailboxes::Fixed { key_version },
        };
        mailboxes.check_policy(self.config.wait_policy)?;
        let firmware = ctx.firmware;

        let mut bracket = self.open()?;
        let outcome = bracket.run(firmware, mailboxes);
        let recorded = bracket.record(ctx);
        let state = bracket.state();
        let closed = bracket.close();

        let key = outcome?;
        recorded?;
        closed?;
        out_key.copy_from_slice(key.as_bytes());
        debug!("TSEC query complete ({state})");
        Ok(())
    }
}

/// One open load/boot/wait/extract sequence.
///
/// Holds the clocks up and the scratch buffer alive until dropped.
pub struct Bracket<'a> {
    soc: &'a Soc,
    timer: &'a dyn Timer,
    config: &'a QueryConfig,
    scratch: ScratchBuffer,
    state: BracketState,
    clocks: ClocksUp<'a>,
}

impl fmt::Debug for Bracket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bracket")
            .field("state", &self.state)
            .field("scratch", &self.scratch)
            .field("clocks", &self.clocks.owned())
            .finish_non_exhaustive()
    }
}

impl Bracket<'_> {
    /// Current state.
    pub const fn state(&self) -> BracketState {
        self.state
    }

    fn require(&self, operation: &'static str, expected: BracketState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TsecError::InvalidState {
                operation,
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    fn fail(&mut self, err: TsecError) -> TsecError {
        self.state = if err.is_timeout() {
            BracketState::TimedOut
        } else {
            BracketState::Faulted
        };
        debug!("Bracket {} after: {err}", self.state);
        err
    }

    /// Stream `firmware` into IMEM.
    ///
    /// # Errors
    ///
    /// [`TsecError::InvalidState`] unless freshly opened, otherwise the
    /// loader's errors.
    pub fn load(&mut self, firmware: &[u8]) -> Result<LoadMetrics> {
        self.require("load", BracketState::ClocksUp)?;
        let loader = DmaLoader::new(self.soc, self.timer, self.config.dma_timeout);
        match loader.load(&mut self.scratch, firmware) {
            Ok(metrics) => {
                self.state = BracketState::FirmwareLoaded;
                Ok(metrics)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Program `mailboxes` and the configured boot vector, then start the
    /// CPU.
    ///
    /// # Errors
    ///
    /// [`TsecError::InvalidState`] unless firmware is loaded,
    /// [`TsecError::InvalidConfig`] if `mailboxes` conflict with the wait
    /// policy (nothing is written and the bracket stays loaded), otherwise
    /// [`TsecError::BootTimeout`].
    pub fn start(&mut self, mailboxes: Mailboxes) -> Result<()> {
        self.require("start", BracketState::FirmwareLoaded)?;
        mailboxes.check_policy(self.config.wait_policy)?;
        match exec::start(
            self.soc,
            self.timer,
            self.config.boot_vector,
            mailboxes,
            self.config.dma_timeout,
        ) {
            Ok(()) => {
                self.state = BracketState::Running;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Wait for completion under the configured policy.
    ///
    /// A completion without the success sentinel (possible under the halt
    /// policy) leaves the bracket faulted.
    ///
    /// # Errors
    ///
    /// [`TsecError::InvalidState`] unless running, otherwise the wait
    /// policy's errors.
    pub fn wait(&mut self) -> Result<Completion> {
        self.require("wait", BracketState::Running)?;
        match exec::wait(
            self.soc,
            self.timer,
            self.config.wait_policy,
            self.config.exec_timeout,
        ) {
            Ok(done) => {
                self.state = if done.succeeded() {
                    BracketState::Succeeded
                } else {
                    BracketState::Faulted
                };
                Ok(done)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Read and clear the derived key. Only possible once per bracket.
    ///
    /// # Errors
    ///
    /// [`TsecError::InvalidState`] unless the firmware reported success and
    /// the key has not been extracted yet.
    pub fn extract(&mut self) -> Result<ResultKey> {
        self.require("extract", BracketState::Succeeded)?;
        match extract::extract(self.soc) {
            Ok(key) => {
                self.state = BracketState::Extracted;
                Ok(key)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Read the engine's status, command-error and exception-info words.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn snapshot(&self) -> Result<EngineSnapshot> {
        EngineSnapshot::read(self.soc)
    }

    /// Copy [`Self::snapshot`] into `ctx`.
    ///
    /// # Errors
    ///
    /// Propagates register access errors; `ctx` is untouched then.
    pub fn record(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let snapshot = self.snapshot()?;
        ctx.record(snapshot);
        Ok(())
    }

    /// Run every stage in order.
    fn run(&mut self, firmware: &[u8], mailboxes: Mailboxes) -> Result<ResultKey> {
        self.load(firmware)?;
        self.start(mailboxes)?;
        let done = self.wait()?;
        if !done.succeeded() {
            return Err(TsecError::BadFinalStatus {
                status: done.status,
            });
        }
        self.extract()
    }

    /// Gate the clocks off and free the scratch buffer.
    ///
    /// Dropping the bracket does the same but can only log a failure.
    ///
    /// # Errors
    ///
    /// Propagates the first clock release error.
    pub fn close(self) -> Result<()> {
        let state = self.state;
        let released = self.clocks.release();
        match &released {
            Ok(()) => info!("TSEC bracket closed ({state})"),
            Err(e) => warn!("TSEC bracket close failed ({state}): {e}"),
        }
        released
    }
}
