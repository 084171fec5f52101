//! Reading the derived key out of the SOR1 side channel.

use crate::error::Result;
use crate::soc::Soc;
use std::fmt;
use tracing::debug;
use tsec_chip::host1x;
use tsec_chip::sor::RESULT_REGS;

/// Size of the derived key.
pub const KEY_LEN: usize = 16;

/// The 16-byte value the firmware leaves in the SOR1 shadow registers.
///
/// `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ResultKey([u8; KEY_LEN]);

impl ResultKey {
    /// Pack four register words little-endian, first register first.
    pub fn from_words(words: [u32; 4]) -> Self {
        let mut bytes = [0u8; KEY_LEN];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Self(bytes)
    }

    /// Key bytes.
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Consume into the raw bytes.
    pub const fn into_bytes(self) -> [u8; KEY_LEN] {
        self.0
    }
}

impl fmt::Debug for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResultKey(<redacted>)")
    }
}

/// Clear the sync-point handshake, read the four result words, then zero
/// the registers they came from.
///
/// Only call once the firmware has reported the success sentinel.
///
/// # Errors
///
/// Propagates register access errors.
pub fn extract(soc: &Soc) -> Result<ResultKey> {
    soc.host1x.write32(host1x::CH0_SYNC_SYNCPT_160, 0)?;

    let mut words = [0u32; 4];
    for (word, &reg) in words.iter_mut().zip(RESULT_REGS.iter()) {
        *word = soc.sor1.read32(reg)?;
    }
    for &reg in &RESULT_REGS {
        soc.sor1.write32(reg, 0)?;
    }

    debug!("Result key extracted, side channel cleared");
    Ok(ResultKey::from_words(words))
}
