//! Clock-and-reset controller (CAR) registers and the TSEC clock bundle.
//!
//! Each peripheral clock has one bit in a reset register and the same bit in
//! a clock-enable register; some also have a source/divisor register.
//! Only the domains a TSEC query needs are described here.

/// Reset devices, bank L.
pub const RST_DEVICES_L: usize = 0x004;
/// Reset devices, bank H.
pub const RST_DEVICES_H: usize = 0x008;
/// Reset devices, bank U.
pub const RST_DEVICES_U: usize = 0x00C;
/// Clock output enable, bank L.
pub const CLK_OUT_ENB_L: usize = 0x010;
/// Clock output enable, bank H.
pub const CLK_OUT_ENB_H: usize = 0x014;
/// Clock output enable, bank U.
pub const CLK_OUT_ENB_U: usize = 0x018;
/// HOST1X clock source.
pub const CLK_SOURCE_HOST1X: usize = 0x180;
/// TSEC clock source.
pub const CLK_SOURCE_TSEC: usize = 0x1F4;
/// Clock output enable, bank X.
pub const CLK_OUT_ENB_X: usize = 0x280;
/// Reset devices, bank X.
pub const RST_DEVICES_X: usize = 0x28C;
/// Clock output enable, bank Y.
pub const CLK_OUT_ENB_Y: usize = 0x298;
/// Reset devices, bank Y.
pub const RST_DEVICES_Y: usize = 0x2A4;
/// SOR1 clock source.
pub const CLK_SOURCE_SOR1: usize = 0x410;

/// Bit position of the source selector inside a `CLK_SOURCE_*` register.
pub const CLK_SOURCE_SHIFT: u32 = 29;

/// Clock domains used by a TSEC query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Host interface.
    Host1x,
    /// The TSEC engine itself.
    Tsec,
    /// SOR safe clock.
    SorSafe,
    /// Display output 0.
    Sor0,
    /// Display output 1 (hosts the result registers).
    Sor1,
    /// Key fuses.
    Kfuse,
}

/// Source register settings for a domain that has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    /// `CLK_SOURCE_*` offset.
    pub reg: usize,
    /// Source selector.
    pub select: u32,
    /// Divisor field.
    pub divisor: u32,
}

impl Source {
    /// Value written to the source register.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.divisor | (self.select << CLK_SOURCE_SHIFT)
    }
}

/// Register placement of one clock domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainRegs {
    /// `RST_DEVICES_*` offset.
    pub reset: usize,
    /// `CLK_OUT_ENB_*` offset.
    pub enable: usize,
    /// Bit index shared by `reset` and `enable`.
    pub bit: u32,
    /// Source register, when the domain has one.
    pub source: Option<Source>,
}

impl DomainRegs {
    /// Single-bit mask for this domain.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        1 << self.bit
    }
}

impl Domain {
    /// Enable order for a TSEC query. Teardown walks it backwards.
    pub const TSEC_BUNDLE: [Self; 6] = [
        Self::Host1x,
        Self::Tsec,
        Self::SorSafe,
        Self::Sor0,
        Self::Sor1,
        Self::Kfuse,
    ];

    /// Register placement.
    #[must_use]
    pub const fn regs(self) -> DomainRegs {
        match self {
            Self::Host1x => DomainRegs {
                reset: RST_DEVICES_L,
                enable: CLK_OUT_ENB_L,
                bit: 28,
                source: Some(Source { reg: CLK_SOURCE_HOST1X, select: 4, divisor: 3 }),
            },
            Self::Tsec => DomainRegs {
                reset: RST_DEVICES_U,
                enable: CLK_OUT_ENB_U,
                bit: 19,
                source: Some(Source { reg: CLK_SOURCE_TSEC, select: 0, divisor: 2 }),
            },
            Self::SorSafe => DomainRegs {
                reset: RST_DEVICES_Y,
                enable: CLK_OUT_ENB_Y,
                bit: 30,
                source: None,
            },
            Self::Sor0 => DomainRegs {
                reset: RST_DEVICES_X,
                enable: CLK_OUT_ENB_X,
                bit: 22,
                source: None,
            },
            Self::Sor1 => DomainRegs {
                reset: RST_DEVICES_X,
                enable: CLK_OUT_ENB_X,
                bit: 23,
                source: Some(Source { reg: CLK_SOURCE_SOR1, select: 0, divisor: 2 }),
            },
            Self::Kfuse => DomainRegs {
                reset: RST_DEVICES_H,
                enable: CLK_OUT_ENB_H,
                bit: 8,
                source: None,
            },
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Host1x => "host1x",
            Self::Tsec => "tsec",
            Self::SorSafe => "sor_safe",
            Self::Sor0 => "sor0",
            Self::Sor1 => "sor1",
            Self::Kfuse => "kfuse",
        }
    }
}

impl core::fmt::Display for Domain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_bits_unique_per_bank() {
        for (i, a) in Domain::TSEC_BUNDLE.iter().enumerate() {
            for b in &Domain::TSEC_BUNDLE[i + 1..] {
                let (ra, rb) = (a.regs(), b.regs());
                assert!(ra.enable != rb.enable || ra.bit != rb.bit, "{a} and {b} share a bit");
            }
        }
    }

    #[test]
    fn host1x_first_kfuse_last() {
        assert_eq!(Domain::TSEC_BUNDLE[0], Domain::Host1x);
        assert_eq!(Domain::TSEC_BUNDLE[5], Domain::Kfuse);
    }

    #[test]
    fn source_value_packs_selector() {
        let src = Source { reg: CLK_SOURCE_HOST1X, select: 4, divisor: 3 };
        assert_eq!(src.value(), 0x8000_0003);
    }
}
