//! Load, boot and query driver for the Tegra X1 TSEC secure engine.
//!
//! The TSEC is a Falcon co-processor. During early boot it runs a signed
//! firmware that derives a 16-byte key and leaves it in four SOR1 HDCP
//! shadow registers. This crate performs one such run end to end:
//!
//! ```text
//! clocks up → load (DMA to IMEM) → boot → wait → extract → clocks down
//! ```
//!
//! Every wait is a busy poll against a [`Timer`]; every failure has a
//! stable numeric code ([`TsecError::code`]); clocks come down on every
//! exit path because they are held by a guard.
//!
//! # Register access
//!
//! ```text
//! Host tool:   MappedRegion (/dev/mem mmap) + CarveoutMapper for DMA
//! Boot stage:  any Mmio impl + IdentityMapper (bus == host address)
//! CI:          sim::SimulatedSoc (software engine model)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use tsec_driver::{ExecutionContext, QueryConfig, Soc, Tsec};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let firmware = std::fs::read("tsec_fw.bin")?;
//! let soc = Soc::map_devmem(0x8000_0000, 0x4000)?;
//! let mut tsec = Tsec::with_system_timer(soc, QueryConfig::from_env()?);
//!
//! let mut ctx = ExecutionContext::new(&firmware);
//! let mut key = [0u8; 16];
//! tsec.query(&mut key, 1, &mut ctx)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod clock;
mod config;
pub mod dma;
mod error;
pub mod exec;
mod extract;
pub mod mmio;
mod query;
pub mod sim;
mod soc;
pub mod timer;

pub use config::{
    QueryConfig, DEFAULT_DMA_TIMEOUT, DEFAULT_EXEC_TIMEOUT, DEFAULT_KEY_VERSION,
    ENV_DMA_TIMEOUT_MS, ENV_EXEC_TIMEOUT_MS, ENV_WAIT_POLICY,
};
pub use dma::{CarveoutMapper, DmaMapper, IdentityMapper, LoadMetrics, ScratchBuffer, TransferWindow};
pub use error::{Result, TsecError};
pub use exec::{Completion, EngineSnapshot, Mailboxes, WaitPolicy};
pub use extract::{ResultKey, KEY_LEN};
pub use mmio::{MappedRegion, Mmio};
pub use query::{Bracket, BracketState, ExecutionContext, PackageOffsets, Tsec};
pub use soc::Soc;
pub use timer::{SystemTimer, Timer};

/// Silicon constants (re-exported from tsec-chip).
pub mod chip {
    pub use tsec_chip::base::Block;
    pub use tsec_chip::exception::{ExceptionInfo, TrapCause};
    pub use tsec_chip::regs::STATUS_SUCCESS;
}
