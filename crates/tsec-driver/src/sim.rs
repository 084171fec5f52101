//! Software model of the TSEC and its companion blocks.
//!
//! Used for hardware-free CI and for `tsec query --simulate`. The model is
//! register-accurate for what the driver touches and nothing more:
//!
//! - the CAR tracks enable/reset bits and logs every clock gate transition
//! - KFUSE reports ready as soon as it is read
//! - a write of the IMEM command to `DMATRFCMD` copies one 256-byte window
//!   out of whatever the driver last mapped, then raises the idle flag
//! - setting `STARTCPU` records the mailboxes and boot vector, then plays
//!   the configured [`Outcome`]
//!
//! [`EngineModel`] injects the failures the driver must handle: a busy DMA
//! engine, a window that never completes, a boot that never settles, and
//! each kind of firmware result.

use crate::dma::{DmaMapper, TransferWindow};
use crate::error::Result;
use crate::mmio::{check_access, Mmio};
use crate::soc::Soc;
use crate::timer::Timer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;
use tsec_chip::base::Block;
use tsec_chip::car::Domain;
use tsec_chip::regs::{self, cpuctl, dmatrfcmd, DMA_BLOCK_SIZE, STATUS_SUCCESS};
use tsec_chip::sor::RESULT_REGS;
use tsec_chip::{host1x, kfuse};

/// Bus address the simulated DMA mapper hands out.
pub const SIM_DMA_BUS: u64 = 0x8000_0000;

/// Key words the default [`Outcome::Success`] deposits: bytes `1..=16`.
pub const SIM_KEY: [u32; 4] = [0x0403_0201, 0x0807_0605, 0x0C0B_0A09, 0x100F_0E0D];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the firmware does once the CPU starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Leave `key` in the SOR1 registers, report the sentinel, halt.
    Success {
        /// Words for the four result registers, in extraction order.
        key: [u32; 4],
    },
    /// Report this status and halt.
    Status(u32),
    /// Never report and never halt.
    Silent,
    /// Halt with this exception info.
    Fault {
        /// Raw `EXCI` value.
        exci: u32,
    },
}

/// Behaviour of the simulated engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineModel {
    /// DMA idle flag set before the first transfer.
    pub dma_idle_at_reset: bool,
    /// Windows after this many never complete.
    pub stall_after_windows: Option<usize>,
    /// Idle flag drops at CPU start and never returns.
    pub boot_dma_stuck: bool,
    /// KFUSE CRC-pass bit.
    pub kfuse_crc_pass: bool,
    /// Value left in the command-error word at CPU start.
    pub cmd_err: u32,
    /// Bus address returned by the DMA mapper.
    pub dma_bus: u64,
    /// Firmware behaviour.
    pub outcome: Outcome,
}

impl Default for EngineModel {
    fn default() -> Self {
        Self {
            dma_idle_at_reset: true,
            stall_after_windows: None,
            boot_dma_stuck: false,
            kfuse_crc_pass: true,
            cmd_err: 0,
            dma_bus: SIM_DMA_BUS,
            outcome: Outcome::Success { key: SIM_KEY },
        }
    }
}

/// A plain register file.
#[derive(Debug)]
pub struct SimRegion {
    block: Block,
    regs: Mutex<HashMap<usize, u32>>,
}

impl SimRegion {
    /// All registers zero.
    pub fn new(block: Block) -> Self {
        Self {
            block,
            regs: Mutex::new(HashMap::new()),
        }
    }

    /// Read without bounds checks or side effects.
    pub fn peek(&self, offset: usize) -> u32 {
        lock(&self.regs).get(&offset).copied().unwrap_or(0)
    }

    /// Write without bounds checks or side effects.
    pub fn poke(&self, offset: usize, value: u32) {
        lock(&self.regs).insert(offset, value);
    }
}

impl Mmio for SimRegion {
    fn block(&self) -> Block {
        self.block
    }

    fn size(&self) -> usize {
        self.block.size()
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        check_access(self.block, self.size(), offset)?;
        Ok(self.peek(offset))
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        check_access(self.block, self.size(), offset)?;
        self.poke(offset, value);
        Ok(())
    }
}

/// A clock gate transition seen by the simulated CAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// Enable bit set.
    Enabled(Domain),
    /// Enable bit cleared.
    Disabled(Domain),
}

/// Ordered record of clock gate transitions.
#[derive(Debug, Default)]
pub struct CarLog {
    events: Vec<ClockEvent>,
}

impl CarLog {
    /// Forget everything recorded so far.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// All transitions in order.
    pub fn events(&self) -> &[ClockEvent] {
        &self.events
    }

    /// Domains in the order they were gated on.
    pub fn enabled_order(&self) -> Vec<Domain> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ClockEvent::Enabled(d) => Some(*d),
                ClockEvent::Disabled(_) => None,
            })
            .collect()
    }

    /// Domains in the order they were gated off.
    pub fn disabled_order(&self) -> Vec<Domain> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ClockEvent::Disabled(d) => Some(*d),
                ClockEvent::Enabled(_) => None,
            })
            .collect()
    }
}

/// Clock-and-reset controller that logs gate transitions.
#[derive(Debug)]
pub struct SimCar {
    regs: SimRegion,
    log: Mutex<CarLog>,
}

impl SimCar {
    fn new() -> Self {
        Self {
            regs: SimRegion::new(Block::Car),
            log: Mutex::new(CarLog::default()),
        }
    }

    /// Raw register value.
    pub fn peek(&self, offset: usize) -> u32 {
        self.regs.peek(offset)
    }
}

impl Mmio for SimCar {
    fn block(&self) -> Block {
        Block::Car
    }

    fn size(&self) -> usize {
        self.regs.size()
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        self.regs.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        let old = self.regs.read32(offset)?;
        self.regs.write32(offset, value)?;

        let changed = old ^ value;
        let mut log = lock(&self.log);
        for domain in Domain::TSEC_BUNDLE {
            let regs = domain.regs();
            if regs.enable != offset || changed & regs.mask() == 0 {
                continue;
            }
            let event = if value & regs.mask() != 0 {
                ClockEvent::Enabled(domain)
            } else {
                ClockEvent::Disabled(domain)
            };
            trace!("sim CAR: {event:?}");
            log.events.push(event);
        }
        Ok(())
    }
}

/// Bytes most recently exposed to the engine.
#[derive(Debug, Clone)]
pub struct SimDma {
    bus: u64,
    staged: Arc<Mutex<Vec<u8>>>,
}

impl DmaMapper for SimDma {
    fn map(&self, staged: &[u8]) -> Result<u64> {
        *lock(&self.staged) = staged.to_vec();
        Ok(self.bus)
    }
}

/// Mailboxes and boot vector as they were when `STARTCPU` was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    /// `MAILBOX0` (boot key version in fixed mode).
    pub mailbox0: u32,
    /// `MAILBOX1` (status).
    pub mailbox1: u32,
    /// `BOOTVEC`.
    pub boot_vector: u32,
    /// HOST1X sync point 160.
    pub syncpt_160: u32,
}

#[derive(Debug, Default)]
struct EngineState {
    windows: Vec<TransferWindow>,
    imem: Vec<u8>,
    boot: Option<BootRecord>,
}

/// The simulated Falcon.
#[derive(Debug)]
pub struct SimEngine {
    regs: SimRegion,
    model: EngineModel,
    host1x: Arc<SimRegion>,
    sor1: Arc<SimRegion>,
    dma: SimDma,
    state: Mutex<EngineState>,
}

impl SimEngine {
    /// Windows issued so far, in order.
    pub fn windows(&self) -> Vec<TransferWindow> {
        lock(&self.state).windows.clone()
    }

    /// IMEM contents written by completed windows.
    pub fn imem(&self) -> Vec<u8> {
        lock(&self.state).imem.clone()
    }

    /// Mailbox state at CPU start, if the CPU was started.
    pub fn boot(&self) -> Option<BootRecord> {
        lock(&self.state).boot
    }

    /// Raw register value.
    pub fn peek(&self, offset: usize) -> u32 {
        self.regs.peek(offset)
    }

    /// Set a register without side effects.
    pub fn poke(&self, offset: usize, value: u32) {
        self.regs.poke(offset, value);
    }

    fn transfer(&self) {
        let window = TransferWindow {
            imem_offset: self.regs.peek(regs::DMATRFMOFFS),
            source_offset: self.regs.peek(regs::DMATRFFBOFFS),
        };
        let mut state = lock(&self.state);
        state.windows.push(window);

        let stalled = self
            .model
            .stall_after_windows
            .is_some_and(|n| state.windows.len() > n);
        if stalled {
            trace!("sim TSEC: window {window:?} stalls");
            self.regs.poke(regs::DMATRFCMD, dmatrfcmd::IMEM);
            return;
        }

        let base = u64::from(self.regs.peek(regs::DMATRFBASE)) << 8;
        let staged = lock(&self.dma.staged);
        let start = usize::try_from(base.saturating_sub(self.dma.bus)).unwrap_or(usize::MAX)
            .saturating_add(window.source_offset as usize);
        let dst = window.imem_offset as usize;
        if state.imem.len() < dst + DMA_BLOCK_SIZE {
            state.imem.resize(dst + DMA_BLOCK_SIZE, 0);
        }
        for i in 0..DMA_BLOCK_SIZE {
            state.imem[dst + i] = start.checked_add(i).and_then(|j| staged.get(j)).copied().unwrap_or(0);
        }
        self.regs.poke(regs::DMATRFCMD, dmatrfcmd::IMEM | dmatrfcmd::IDLE);
    }

    fn boot_cpu(&self) {
        let record = BootRecord {
            mailbox0: self.regs.peek(regs::MAILBOX0),
            mailbox1: self.regs.peek(regs::MAILBOX1),
            boot_vector: self.regs.peek(regs::BOOTVEC),
            syncpt_160: self.host1x.peek(host1x::CH0_SYNC_SYNCPT_160),
        };
        lock(&self.state).boot = Some(record);
        self.regs.poke(regs::CMD_ERR, self.model.cmd_err);
        if self.model.boot_dma_stuck {
            let cmd = self.regs.peek(regs::DMATRFCMD);
            self.regs.poke(regs::DMATRFCMD, cmd & !dmatrfcmd::IDLE);
        }

        match self.model.outcome {
            Outcome::Success { key } => {
                for (&reg, word) in RESULT_REGS.iter().zip(key) {
                    self.sor1.poke(reg, word);
                }
                self.regs.poke(regs::STATUS, STATUS_SUCCESS);
                self.regs.poke(regs::CPUCTL, cpuctl::HALTED);
            }
            Outcome::Status(status) => {
                self.regs.poke(regs::STATUS, status);
                self.regs.poke(regs::CPUCTL, cpuctl::HALTED);
            }
            Outcome::Silent => self.regs.poke(regs::CPUCTL, 0),
            Outcome::Fault { exci } => {
                self.regs.poke(regs::EXCI, exci);
                self.regs.poke(regs::CPUCTL, cpuctl::HALTED);
            }
        }
        trace!("sim TSEC: booted {record:?}, outcome {:?}", self.model.outcome);
    }
}

impl Mmio for SimEngine {
    fn block(&self) -> Block {
        Block::Tsec
    }

    fn size(&self) -> usize {
        self.regs.size()
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        self.regs.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        self.regs.write32(offset, value)?;
        match offset {
            regs::DMATRFCMD if value & dmatrfcmd::IMEM != 0 => self.transfer(),
            regs::CPUCTL if value & cpuctl::STARTCPU != 0 => self.boot_cpu(),
            _ => {}
        }
        Ok(())
    }
}

/// Every simulated block, shared with the [`Soc`] handed to the driver.
#[derive(Debug)]
pub struct SimulatedSoc {
    /// TSEC engine.
    pub tsec: Arc<SimEngine>,
    /// HOST1X.
    pub host1x: Arc<SimRegion>,
    /// SOR1.
    pub sor1: Arc<SimRegion>,
    /// KFUSE.
    pub kfuse: Arc<SimRegion>,
    /// Clock and reset controller.
    pub car: Arc<SimCar>,
    dma: SimDma,
}

impl SimulatedSoc {
    /// Build a model with all clocks off.
    pub fn new(model: EngineModel) -> Self {
        let host1x = Arc::new(SimRegion::new(Block::Host1x));
        let sor1 = Arc::new(SimRegion::new(Block::Sor1));
        let kfuse = Arc::new(SimRegion::new(Block::Kfuse));
        let car = Arc::new(SimCar::new());
        let dma = SimDma {
            bus: model.dma_bus,
            staged: Arc::new(Mutex::new(Vec::new())),
        };

        let mut fuse_state = kfuse::state::DONE;
        if model.kfuse_crc_pass {
            fuse_state |= kfuse::state::CRCPASS;
        }
        kfuse.poke(kfuse::STATE, fuse_state);

        let tsec = Arc::new(SimEngine {
            regs: SimRegion::new(Block::Tsec),
            model,
            host1x: Arc::clone(&host1x),
            sor1: Arc::clone(&sor1),
            dma: dma.clone(),
            state: Mutex::new(EngineState::default()),
        });
        if model.dma_idle_at_reset {
            tsec.poke(regs::DMATRFCMD, dmatrfcmd::IDLE);
        }

        Self {
            tsec,
            host1x,
            sor1,
            kfuse,
            car,
            dma,
        }
    }

    /// Register view for the driver.
    pub fn soc(&self) -> Soc {
        Soc {
            tsec: Box::new(Arc::clone(&self.tsec)),
            host1x: Box::new(Arc::clone(&self.host1x)),
            sor1: Box::new(Arc::clone(&self.sor1)),
            kfuse: Box::new(Arc::clone(&self.kfuse)),
            car: Box::new(Arc::clone(&self.car)),
            dma: Box::new(self.dma.clone()),
        }
    }

    /// Gate `domain` on as if another owner had done it.
    pub fn enable_clock(&self, domain: Domain) {
        let regs = domain.regs();
        self.car.regs.poke(regs.enable, self.car.peek(regs.enable) | regs.mask());
        self.car.regs.poke(regs.reset, self.car.peek(regs.reset) & !regs.mask());
    }

    /// Clock gate transitions seen so far.
    pub fn car_log(&self) -> MutexGuard<'_, CarLog> {
        lock(&self.car.log)
    }

    /// Bytes the driver last exposed through the DMA mapper.
    pub fn staged(&self) -> Vec<u8> {
        lock(&self.dma.staged).clone()
    }
}

/// Timer that advances a fixed step on every reading and never sleeps.
#[derive(Debug)]
pub struct SteppingTimer {
    now: AtomicU64,
    step_ms: u64,
}

impl SteppingTimer {
    /// Start at zero and advance `step_ms` per [`Timer::now_ms`] call.
    pub const fn new(step_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(0),
            step_ms,
        }
    }
}

impl Timer for SteppingTimer {
    fn now_ms(&self) -> u64 {
        self.now.fetch_add(self.step_ms, Ordering::Relaxed)
    }

    fn delay_us(&self, _us: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn car_logs_gate_transitions() {
        let sim = SimulatedSoc::new(EngineModel::default());
        let regs = Domain::Sor1.regs();
        sim.car.set_bits(regs.enable, regs.mask()).unwrap();
        sim.car.clear_bits(regs.enable, regs.mask()).unwrap();
        sim.car.clear_bits(regs.enable, regs.mask()).unwrap();

        let log = sim.car_log();
        assert_eq!(
            log.events(),
            &[ClockEvent::Enabled(Domain::Sor1), ClockEvent::Disabled(Domain::Sor1)]
        );
    }

    #[test]
    fn regions_enforce_bounds() {
        let sim = SimulatedSoc::new(EngineModel::default());
        assert!(sim.kfuse.read32(0x400).is_err());
        assert!(sim.tsec.write32(0x1001, 0).is_err());
    }

    #[test]
    fn kfuse_reflects_crc_model() {
        let sim = SimulatedSoc::new(EngineModel {
            kfuse_crc_pass: false,
            ..EngineModel::default()
        });
        assert_eq!(sim.kfuse.peek(kfuse::STATE), kfuse::state::DONE);
    }

    #[test]
    fn stepping_timer_advances_per_read() {
        let timer = SteppingTimer::new(5);
        assert_eq!(timer.now_ms(), 0);
        assert_eq!(timer.now_ms(), 5);
        assert_eq!(timer.now_ms(), 10);
    }
}
