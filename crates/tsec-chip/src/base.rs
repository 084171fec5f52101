//! Physical memory map of the blocks touched by a TSEC query.
//!
//! ```text
//! Block    Base          Window   Purpose
//! ──────── ───────────── ──────── ──────────────────────────────────────
//! HOST1X   0x5000_0000   256 KB   Sync points (boot handshake)
//! TSEC     0x5450_0000   256 KB   Falcon engine, DMA, mailboxes
//! SOR1     0x5458_0000   256 KB   Display output, HDCP shadow registers
//! CAR      0x6000_6000   4 KB     Clock and reset controller
//! KFUSE    0x7000_FC00   1 KB     Key fuses (ready/CRC state)
//! ```

/// A register block with a fixed physical placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Block {
    /// TSEC Falcon engine.
    Tsec,
    /// HOST1X companion sync block.
    Host1x,
    /// SOR1 display-output block.
    Sor1,
    /// KFUSE fuse block.
    Kfuse,
    /// Clock and reset controller.
    Car,
}

impl Block {
    /// Every block, in the order the driver maps them.
    pub const ALL: [Self; 5] = [Self::Tsec, Self::Host1x, Self::Sor1, Self::Kfuse, Self::Car];

    /// Physical base address.
    #[must_use]
    pub const fn base(self) -> u64 {
        match self {
            Self::Tsec => 0x5450_0000,
            Self::Host1x => 0x5000_0000,
            Self::Sor1 => 0x5458_0000,
            Self::Kfuse => 0x7000_FC00,
            Self::Car => 0x6000_6000,
        }
    }

    /// Size of the register window in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Tsec | Self::Host1x | Self::Sor1 => 0x4_0000,
            Self::Kfuse => 0x400,
            Self::Car => 0x1000,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tsec => "TSEC",
            Self::Host1x => "HOST1X",
            Self::Sor1 => "SOR1",
            Self::Kfuse => "KFUSE",
            Self::Car => "CAR",
        }
    }
}

impl core::fmt::Display for Block {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_do_not_overlap() {
        for a in Block::ALL {
            for b in Block::ALL {
                if a == b {
                    continue;
                }
                let a_end = a.base() + a.size() as u64;
                let b_end = b.base() + b.size() as u64;
                assert!(a_end <= b.base() || b_end <= a.base(), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn bases_are_page_aligned_or_fuse() {
        assert_eq!(Block::Tsec.base() % 0x1000, 0);
        assert_eq!(Block::Car.base() % 0x1000, 0);
        assert_eq!(Block::Kfuse.base() % 0x400, 0);
    }
}
