//! Boot and completion of the Falcon CPU.

use crate::dma::wait_dma_idle;
use crate::error::{Result, TsecError};
use crate::soc::Soc;
use crate::timer::{spin_until, wait_on, Timer, WaitStage};
use std::time::Duration;
use tracing::{debug, error, info};
use tsec_chip::exception::ExceptionInfo;
use tsec_chip::host1x;
use tsec_chip::regs::{self, cpuctl, STATUS_SUCCESS};

/// What goes into the mailbox registers before the CPU starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mailboxes {
    /// Boot-loader convention: arm the HOST1X sync point, clear the status
    /// mailbox, and pass the key version in the boot-key-version mailbox.
    Fixed {
        /// Value for `BOOTKEYVER`.
        key_version: u8,
    },
    /// Caller-chosen mailbox pair, written verbatim.
    Handshake {
        /// Value for `MAILBOX0`.
        mailbox0: u32,
        /// Value for `MAILBOX1`.
        mailbox1: u32,
    },
}

impl Mailboxes {
    /// Value the status mailbox holds when the CPU starts.
    ///
    /// `STATUS` and `MAILBOX1` are the same register, so in handshake mode
    /// this is the caller's `mailbox1`.
    pub const fn armed_status(self) -> u32 {
        match self {
            Self::Fixed { .. } => 0,
            Self::Handshake { mailbox1, .. } => mailbox1,
        }
    }

    /// Check that a completion seen under `policy` can only have been
    /// written by the firmware.
    ///
    /// The bounded wait treats any nonzero status as completion, so the
    /// status mailbox must start at zero. Under either policy it must not
    /// start at the success sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`TsecError::InvalidConfig`] for a mailbox pair that would
    /// let the host's own write pass for a firmware result.
    pub fn check_policy(self, policy: WaitPolicy) -> Result<()> {
        let armed = self.armed_status();
        if armed == STATUS_SUCCESS {
            return Err(TsecError::invalid_config(format!(
                "mailbox1 {armed:#010x} is the success sentinel"
            )));
        }
        if policy == WaitPolicy::Bounded && armed != 0 {
            return Err(TsecError::invalid_config(format!(
                "mailbox1 {armed:#010x} must be zero with the bounded wait policy"
            )));
        }
        Ok(())
    }
}

/// How [`wait`] decides the firmware has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Poll the status mailbox until nonzero, within the execution timeout.
    #[default]
    Bounded,
    /// Spin until the CPU halts, then check exception info. Never times
    /// out: a firmware that does not halt hangs the caller.
    Halt,
}

impl WaitPolicy {
    /// Lowercase name, as accepted by `TSEC_WAIT_POLICY`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bounded => "bounded",
            Self::Halt => "halt",
        }
    }
}

impl std::str::FromStr for WaitPolicy {
    type Err = TsecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bounded" => Ok(Self::Bounded),
            "halt" => Ok(Self::Halt),
            other => Err(TsecError::invalid_config(format!(
                "unknown wait policy {other:?} (expected bounded or halt)"
            ))),
        }
    }
}

/// Outcome of a [`wait`] that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Status mailbox at completion.
    pub status: u32,
}

impl Completion {
    /// `true` if the firmware reported the success sentinel.
    pub const fn succeeded(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Engine words recorded into an execution context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSnapshot {
    /// Status mailbox.
    pub status: u32,
    /// Command-error word.
    pub cmd_err: u32,
    /// Exception info.
    pub exception_info: u32,
}

impl EngineSnapshot {
    /// Read the three words.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn read(soc: &Soc) -> Result<Self> {
        Ok(Self {
            status: soc.tsec.read32(regs::STATUS)?,
            cmd_err: soc.tsec.read32(regs::CMD_ERR)?,
            exception_info: soc.tsec.read32(regs::EXCI)?,
        })
    }
}

/// Program mailboxes and boot vector, start the CPU, and confirm the DMA
/// engine settles.
///
/// # Errors
///
/// Returns [`TsecError::BootTimeout`] if the DMA idle flag does not set
/// within `dma_timeout`.
pub fn start(
    soc: &Soc,
    timer: &dyn Timer,
    boot_vector: u32,
    mailboxes: Mailboxes,
    dma_timeout: Duration,
) -> Result<()> {
    match mailboxes {
        Mailboxes::Fixed { key_version } => {
            soc.host1x
                .write32(host1x::CH0_SYNC_SYNCPT_160, host1x::SYNCPT_160_MAGIC)?;
            soc.tsec.write32(regs::STATUS, 0)?;
            soc.tsec.write32(regs::BOOTKEYVER, u32::from(key_version))?;
        }
        Mailboxes::Handshake { mailbox0, mailbox1 } => {
            soc.tsec.write32(regs::MAILBOX0, mailbox0)?;
            soc.tsec.write32(regs::MAILBOX1, mailbox1)?;
        }
    }
    soc.tsec.write32(regs::BOOTVEC, boot_vector)?;
    soc.tsec.write32(regs::CPUCTL, cpuctl::STARTCPU)?;
    debug!("CPU started at boot vector {boot_vector:#x} ({mailboxes:?})");

    wait_dma_idle(soc, timer, WaitStage::Boot, dma_timeout)
}

/// Wait for the firmware to finish according to `policy`.
///
/// Under [`WaitPolicy::Bounded`] a nonzero status other than the success
/// sentinel is an error. Under [`WaitPolicy::Halt`] only the exception info
/// is judged; the returned [`Completion`] carries whatever status the
/// firmware left.
///
/// # Errors
///
/// - [`TsecError::ExecutionTimeout`] if the status stays zero (bounded)
/// - [`TsecError::BadFinalStatus`] for a non-sentinel status (bounded)
/// - [`TsecError::FaultedExecution`] for a nonzero exception info (halt)
pub fn wait(
    soc: &Soc,
    timer: &dyn Timer,
    policy: WaitPolicy,
    exec_timeout: Duration,
) -> Result<Completion> {
    match policy {
        WaitPolicy::Bounded => {
            let status = wait_on(timer, WaitStage::Execution, exec_timeout, || {
                let status = soc.tsec.read32(regs::STATUS)?;
                Ok((status != 0).then_some(status))
            })?;
            if status != STATUS_SUCCESS {
                return Err(TsecError::BadFinalStatus { status });
            }
            info!("TSEC firmware reported success");
            Ok(Completion { status })
        }
        WaitPolicy::Halt => {
            spin_until(|| {
                let ctl = soc.tsec.read32(regs::CPUCTL)?;
                Ok((ctl & cpuctl::HALTED != 0).then_some(()))
            })?;
            let exci = soc.tsec.read32(regs::EXCI)?;
            if exci != 0 {
                error!("TSEC exception: {}", ExceptionInfo::new(exci));
                return Err(TsecError::FaultedExecution {
                    exception_info: exci,
                });
            }
            let status = soc.tsec.read32(regs::STATUS)?;
            info!("TSEC halted cleanly (status {status:#010x})");
            Ok(Completion { status })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{EngineModel, Outcome, SimulatedSoc, SteppingTimer};

    const DMA: Duration = Duration::from_secs(10);
    const EXEC: Duration = Duration::from_secs(2);

    #[test]
    fn fixed_mailboxes_arm_sync_point() {
        let sim = SimulatedSoc::new(EngineModel::default());
        let soc = sim.soc();
        let timer = SteppingTimer::new(1);

        start(&soc, &timer, 0, Mailboxes::Fixed { key_version: 1 }, DMA).unwrap();

        let boot = sim.tsec.boot().unwrap();
        assert_eq!(boot.mailbox0, 1);
        assert_eq!(boot.mailbox1, 0);
        assert_eq!(boot.boot_vector, 0);
        assert_eq!(boot.syncpt_160, host1x::SYNCPT_160_MAGIC);
    }

    #[test]
    fn handshake_mailboxes_pass_through() {
        let sim = SimulatedSoc::new(EngineModel::default());
        let soc = sim.soc();
        let timer = SteppingTimer::new(1);

        let mailboxes = Mailboxes::Handshake {
            mailbox0: 0xDEAD_0000,
            mailbox1: 0x0000_BEEF,
        };
        start(&soc, &timer, 0x100, mailboxes, DMA).unwrap();

        let boot = sim.tsec.boot().unwrap();
        assert_eq!(boot.mailbox0, 0xDEAD_0000);
        assert_eq!(boot.mailbox1, 0x0000_BEEF);
        assert_eq!(boot.boot_vector, 0x100);
        assert_eq!(boot.syncpt_160, 0);
    }

    #[test]
    fn stuck_boot_dma_times_out() {
        let sim = SimulatedSoc::new(EngineModel {
            boot_dma_stuck: true,
            ..EngineModel::default()
        });
        let soc = sim.soc();
        let timer = SteppingTimer::new(500);

        let err = start(&soc, &timer, 0, Mailboxes::Fixed { key_version: 1 }, DMA).unwrap_err();
        assert!(matches!(err, TsecError::BootTimeout { .. }));
    }

    #[test]
    fn bounded_wait_classifies_status() {
        let cases = [
            (Outcome::Silent, -4),
            (Outcome::Status(0x0000_0BAD), -5),
        ];
        for (outcome, code) in cases {
            let sim = SimulatedSoc::new(EngineModel {
                outcome,
                ..EngineModel::default()
            });
            let soc = sim.soc();
            let timer = SteppingTimer::new(100);
            start(&soc, &timer, 0, Mailboxes::Fixed { key_version: 1 }, DMA).unwrap();
            let err = wait(&soc, &timer, WaitPolicy::Bounded, EXEC).unwrap_err();
            assert_eq!(err.code(), code, "{outcome:?}");
        }
    }

    #[test]
    fn bounded_wait_accepts_sentinel() {
        let sim = SimulatedSoc::new(EngineModel::default());
        let soc = sim.soc();
        let timer = SteppingTimer::new(1);
        start(&soc, &timer, 0, Mailboxes::Fixed { key_version: 1 }, DMA).unwrap();

        let done = wait(&soc, &timer, WaitPolicy::Bounded, EXEC).unwrap();
        assert!(done.succeeded());
    }

    #[test]
    fn halt_wait_reports_fault() {
        let sim = SimulatedSoc::new(EngineModel {
            outcome: Outcome::Fault { exci: 0x0050_1234 },
            ..EngineModel::default()
        });
        let soc = sim.soc();
        let timer = SteppingTimer::new(1);
        start(&soc, &timer, 0, Mailboxes::Fixed { key_version: 1 }, DMA).unwrap();

        let err = wait(&soc, &timer, WaitPolicy::Halt, EXEC).unwrap_err();
        let info = err.exception().unwrap();
        assert_eq!(info.pc(), 0x1234);
        assert_eq!(err.code(), -6);
    }

    #[test]
    fn halt_wait_returns_status_without_judging_it() {
        let sim = SimulatedSoc::new(EngineModel {
            outcome: Outcome::Status(7),
            ..EngineModel::default()
        });
        let soc = sim.soc();
        let timer = SteppingTimer::new(1);
        start(&soc, &timer, 0, Mailboxes::Fixed { key_version: 1 }, DMA).unwrap();

        let done = wait(&soc, &timer, WaitPolicy::Halt, EXEC).unwrap();
        assert_eq!(done.status, 7);
        assert!(!done.succeeded());
    }

    #[test]
    fn handshake_status_must_start_clear_for_bounded_wait() {
        let fixed = Mailboxes::Fixed { key_version: 1 };
        assert!(fixed.check_policy(WaitPolicy::Bounded).is_ok());

        let clear = Mailboxes::Handshake { mailbox0: 1, mailbox1: 0 };
        assert!(clear.check_policy(WaitPolicy::Bounded).is_ok());

        let busy = Mailboxes::Handshake { mailbox0: 1, mailbox1: 2 };
        assert_eq!(busy.check_policy(WaitPolicy::Bounded).unwrap_err().code(), -10);
        assert!(busy.check_policy(WaitPolicy::Halt).is_ok());

        let sentinel = Mailboxes::Handshake { mailbox0: 1, mailbox1: STATUS_SUCCESS };
        assert_eq!(sentinel.armed_status(), STATUS_SUCCESS);
        assert_eq!(sentinel.check_policy(WaitPolicy::Bounded).unwrap_err().code(), -10);
        assert_eq!(sentinel.check_policy(WaitPolicy::Halt).unwrap_err().code(), -10);
    }

    #[test]
    fn wait_policy_parses_names() {
        assert_eq!("bounded".parse::<WaitPolicy>().unwrap(), WaitPolicy::Bounded);
        assert_eq!(" HALT ".parse::<WaitPolicy>().unwrap(), WaitPolicy::Halt);
        assert_eq!("later".parse::<WaitPolicy>().unwrap_err().code(), -10);
    }
}
