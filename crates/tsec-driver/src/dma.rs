//! Firmware loading into TSEC instruction memory.
//!
//! The image is staged in a 256-byte aligned [`ScratchBuffer`], made visible
//! to the engine through a [`DmaMapper`], then pulled into IMEM one
//! [`TransferWindow`] at a time. Each window is confirmed by a bounded poll
//! on the DMA idle flag; the first window that does not complete aborts the
//! load and no later window is issued.
//!
//! IMEM transfers are always whole 256-byte blocks. A final partial window
//! reads past the image into the zero-filled tail of the scratch buffer, so
//! IMEM beyond the image is loaded with zeros.

use crate::error::{Result, TsecError};
use crate::mmio::PhysMapping;
use crate::soc::Soc;
use crate::timer::{wait_on, Timer, WaitStage};
use bytemuck::{Pod, Zeroable};
use std::time::Duration;
use tracing::{debug, info};
use tsec_chip::regs::{self, dmatrfcmd, itfen, DMA_BLOCK_SIZE};

/// Default scratch capacity (16 KiB).
pub const SCRATCH_CAPACITY: usize = 0x4000;

/// One DMA block, aligned the way `DMATRFBASE` requires.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C, align(256))]
struct DmaBlock([u8; DMA_BLOCK_SIZE]);

/// Driver-owned staging buffer for one load.
///
/// Storage is a vector of 256-byte aligned blocks, so the first byte is
/// always on a 256-byte boundary. The buffer is zero-filled on creation and
/// freed when dropped.
pub struct ScratchBuffer {
    blocks: Vec<DmaBlock>,
    staged: usize,
}

impl std::fmt::Debug for ScratchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchBuffer")
            .field("capacity", &self.capacity())
            .field("staged", &self.staged)
            .field("ptr", &format_args!("{:p}", self.blocks.as_ptr()))
            .finish()
    }
}

impl ScratchBuffer {
    /// Allocate a zeroed buffer of at least `capacity` bytes, rounded up to
    /// whole DMA blocks.
    pub fn new(capacity: usize) -> Self {
        let blocks = capacity.div_ceil(DMA_BLOCK_SIZE);
        Self {
            blocks: vec![DmaBlock::zeroed(); blocks],
            staged: 0,
        }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.blocks.len() * DMA_BLOCK_SIZE
    }

    /// `true` if the first byte sits on a 256-byte boundary.
    pub fn is_aligned(&self) -> bool {
        self.blocks.as_ptr() as usize % DMA_BLOCK_SIZE == 0
    }

    /// Copy `image` to the start of the buffer and zero the rest of its
    /// last block. Returns the staged span, rounded up to whole windows.
    ///
    /// # Errors
    ///
    /// Returns [`TsecError::FirmwareTooLarge`] if `image` does not fit.
    pub fn stage(&mut self, image: &[u8]) -> Result<&[u8]> {
        let capacity = self.capacity();
        if image.len() > capacity {
            return Err(TsecError::FirmwareTooLarge {
                len: image.len(),
                capacity,
            });
        }

        let span = image.len().div_ceil(DMA_BLOCK_SIZE) * DMA_BLOCK_SIZE;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.blocks);
        bytes[..image.len()].copy_from_slice(image);
        bytes[image.len()..span].fill(0);
        self.staged = span;

        Ok(&bytemuck::cast_slice::<DmaBlock, u8>(&self.blocks)[..span])
    }

    /// Bytes staged by the last [`Self::stage`] call.
    pub fn staged(&self) -> &[u8] {
        &bytemuck::cast_slice::<DmaBlock, u8>(&self.blocks)[..self.staged]
    }
}

/// One 256-byte IMEM transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferWindow {
    /// Destination offset in IMEM.
    pub imem_offset: u32,
    /// Source offset from the DMA base.
    pub source_offset: u32,
}

impl TransferWindow {
    /// Windows covering `[0, len)`: `ceil(len / 256)` of them.
    pub fn plan(len: usize) -> impl Iterator<Item = Self> {
        (0..len).step_by(DMA_BLOCK_SIZE).map(|w| {
            #[allow(clippy::cast_possible_truncation)]
            let offset = w as u32;
            Self {
                imem_offset: offset,
                source_offset: offset,
            }
        })
    }
}

/// Makes staged scratch bytes visible to the engine.
pub trait DmaMapper: Send + Sync {
    /// Expose `staged` to the engine and return the bus address of its
    /// first byte. Must be 256-byte aligned.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be exposed.
    fn map(&self, staged: &[u8]) -> Result<u64>;
}

/// Bus address equals host address, as in the boot environment where the
/// BPMP runs with its MMU off.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl DmaMapper for IdentityMapper {
    fn map(&self, staged: &[u8]) -> Result<u64> {
        Ok(staged.as_ptr() as u64)
    }
}

/// Stages firmware through a reserved, physically contiguous carveout
/// mapped from `/dev/mem`.
#[derive(Debug)]
pub struct CarveoutMapper {
    mapping: PhysMapping,
    phys: u64,
}

impl CarveoutMapper {
    /// Map `len` bytes of reserved memory at `phys`.
    ///
    /// # Errors
    ///
    /// Returns [`TsecError::InvalidConfig`] if `phys` is not 256-byte
    /// aligned, or a mapping error.
    pub fn open(phys: u64, len: usize) -> Result<Self> {
        if phys % DMA_BLOCK_SIZE as u64 != 0 {
            return Err(TsecError::invalid_config(format!(
                "DMA carveout {phys:#x} is not 256-byte aligned"
            )));
        }
        let mapping = PhysMapping::open(phys, len, "DMA carveout")?;
        Ok(Self { mapping, phys })
    }
}

impl DmaMapper for CarveoutMapper {
    fn map(&self, staged: &[u8]) -> Result<u64> {
        if !self.mapping.copy_in(0, staged) {
            return Err(TsecError::FirmwareTooLarge {
                len: staged.len(),
                capacity: self.mapping.size(),
            });
        }
        Ok(self.phys)
    }
}

/// `DMATRFBASE` value for a bus address.
///
/// # Errors
///
/// Returns [`TsecError::DmaAddress`] if the address is unaligned or wider
/// than 40 bits.
pub fn base_register(bus: u64) -> Result<u32> {
    if bus % DMA_BLOCK_SIZE as u64 != 0 {
        return Err(TsecError::DmaAddress { address: bus });
    }
    u32::try_from(bus >> 8).map_err(|_| TsecError::DmaAddress { address: bus })
}

/// Load operation metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadMetrics {
    /// Windows issued and confirmed
    pub windows: usize,
    /// Image bytes loaded
    pub bytes: usize,
    /// Total duration, as measured by the loader's [`Timer`]
    pub duration: Duration,
}

/// Put the Falcon into a known state before any DMA.
fn configure_engine(soc: &Soc) -> Result<()> {
    soc.tsec.write32(regs::DMACTL, 0)?;
    soc.tsec.write32(regs::IRQMSET, regs::default_irq_mask())?;
    soc.tsec.write32(regs::IRQDEST, regs::default_irq_dest())?;
    soc.tsec.write32(regs::ITFEN, itfen::CTXEN | itfen::MTHDEN)
}

/// Poll `DMATRFCMD` for the idle flag within `timeout`.
///
/// # Errors
///
/// Returns `stage`'s timeout error, or a register access error.
pub fn wait_dma_idle(soc: &Soc, timer: &dyn Timer, stage: WaitStage, timeout: Duration) -> Result<()> {
    wait_on(timer, stage, timeout, || {
        let cmd = soc.tsec.read32(regs::DMATRFCMD)?;
        Ok((cmd & dmatrfcmd::IDLE != 0).then_some(()))
    })
}

/// Streams a firmware image into IMEM.
#[derive(Debug)]
pub struct DmaLoader<'a> {
    soc: &'a Soc,
    timer: &'a dyn Timer,
    timeout: Duration,
}

impl<'a> DmaLoader<'a> {
    /// Create a loader with a per-window `timeout`.
    pub fn new(soc: &'a Soc, timer: &'a dyn Timer, timeout: Duration) -> Self {
        Self { soc, timer, timeout }
    }

    /// Load `image` through `scratch`.
    ///
    /// Content is not inspected. A zero-length image issues no windows.
    ///
    /// # Errors
    ///
    /// - [`TsecError::FirmwareTooLarge`] before any register is touched
    /// - [`TsecError::ConfigurationTimeout`] if the DMA engine is busy
    /// - [`TsecError::TransferTimeout`] for the first window that stalls
    pub fn load(&self, scratch: &mut ScratchBuffer, image: &[u8]) -> Result<LoadMetrics> {
        let start_ms = self.timer.now_ms();
        if image.len() > scratch.capacity() {
            return Err(TsecError::FirmwareTooLarge {
                len: image.len(),
                capacity: scratch.capacity(),
            });
        }

        configure_engine(self.soc)?;
        wait_dma_idle(self.soc, self.timer, WaitStage::DmaConfigure, self.timeout)?;

        debug_assert!(scratch.is_aligned());
        let staged = scratch.stage(image)?;
        let bus = self.soc.dma.map(staged)?;
        self.soc.tsec.write32(regs::DMATRFBASE, base_register(bus)?)?;
        debug!("Staged {} bytes at bus {bus:#x}", image.len());

        let mut windows = 0;
        for window in TransferWindow::plan(image.len()) {
            self.soc.tsec.write32(regs::DMATRFMOFFS, window.imem_offset)?;
            self.soc.tsec.write32(regs::DMATRFFBOFFS, window.source_offset)?;
            self.soc.tsec.write32(regs::DMATRFCMD, dmatrfcmd::IMEM)?;
            wait_dma_idle(
                self.soc,
                self.timer,
                WaitStage::DmaWindow(window.imem_offset),
                self.timeout,
            )?;
            windows += 1;
        }

        let metrics = LoadMetrics {
            windows,
            bytes: image.len(),
            duration: Duration::from_millis(self.timer.now_ms().saturating_sub(start_ms)),
        };
        info!(
            "Firmware loaded: {} bytes in {} windows ({:?})",
            metrics.bytes, metrics.windows, metrics.duration
        );
        Ok(metrics)
    }
}
