//! The set of register blocks and DMA mapping a TSEC bracket runs against.

use crate::dma::{CarveoutMapper, DmaMapper};
use crate::error::Result;
use crate::mmio::{MappedRegion, Mmio};
use std::fmt;
use tsec_chip::base::Block;

/// Register accessors for every block the protocol touches.
///
/// Built once by the caller and handed to [`crate::Tsec`]; there is no
/// global register state.
pub struct Soc {
    /// TSEC engine.
    pub tsec: Box<dyn Mmio>,
    /// HOST1X sync block.
    pub host1x: Box<dyn Mmio>,
    /// SOR1 display block (result side channel).
    pub sor1: Box<dyn Mmio>,
    /// KFUSE fuse block.
    pub kfuse: Box<dyn Mmio>,
    /// Clock and reset controller.
    pub car: Box<dyn Mmio>,
    /// How scratch memory becomes visible to the engine.
    pub dma: Box<dyn DmaMapper>,
}

impl fmt::Debug for Soc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Soc")
            .field("tsec", &self.tsec.block())
            .field("host1x", &self.host1x.block())
            .field("sor1", &self.sor1.block())
            .field("kfuse", &self.kfuse.block())
            .field("car", &self.car.block())
            .finish_non_exhaustive()
    }
}

impl Soc {
    /// Map every block from `/dev/mem`, staging firmware through a
    /// reserved physical carveout at `carveout_phys`.
    ///
    /// # Errors
    ///
    /// Returns an error if any block or the carveout cannot be mapped.
    pub fn map_devmem(carveout_phys: u64, carveout_len: usize) -> Result<Self> {
        tracing::info!("Mapping TSEC register blocks from /dev/mem");
        Ok(Self {
            tsec: Box::new(MappedRegion::map(Block::Tsec)?),
            host1x: Box::new(MappedRegion::map(Block::Host1x)?),
            sor1: Box::new(MappedRegion::map(Block::Sor1)?),
            kfuse: Box::new(MappedRegion::map(Block::Kfuse)?),
            car: Box::new(MappedRegion::map(Block::Car)?),
            dma: Box::new(CarveoutMapper::open(carveout_phys, carveout_len)?),
        })
    }
}
