//! Falcon exception-info (`EXCI`) decoding.
//!
//! ```text
//! 31      24 23  20 19                    0
//! ┌─────────┬──────┬──────────────────────┐
//! │ unused  │cause │   program counter    │
//! └─────────┴──────┴──────────────────────┘
//! ```
//!
//! Decoding is for diagnostics only: any nonzero `EXCI` after a halt is a
//! fault regardless of which cause it names.

/// Mask of the program-counter field.
pub const PC_MASK: u32 = 0x000F_FFFF;
/// Shift of the cause field.
pub const CAUSE_SHIFT: u32 = 20;
/// Mask of the cause field after shifting.
pub const CAUSE_MASK: u32 = 0xF;

/// Exception cause reported by the Falcon core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    /// Software trap 0–3.
    Trap(u8),
    /// Invalid opcode.
    InvalidOpcode,
    /// Entry into authenticated (heavy secure) mode failed.
    AuthenticationEntry,
    /// IMEM page miss.
    PageMiss,
    /// More than one IMEM page matched.
    MultiplePageMiss,
    /// Breakpoint hit.
    Breakpoint,
    /// Any other cause value.
    Unknown(u8),
}

impl TrapCause {
    /// Decode the 4-bit cause field.
    #[must_use]
    pub const fn from_cause(cause: u8) -> Self {
        match cause {
            0..=3 => Self::Trap(cause),
            4 => Self::InvalidOpcode,
            5 => Self::AuthenticationEntry,
            6 => Self::PageMiss,
            7 => Self::MultiplePageMiss,
            8 => Self::Breakpoint,
            other => Self::Unknown(other),
        }
    }
}

impl core::fmt::Display for TrapCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Trap(n) => write!(f, "Trap {n}"),
            Self::InvalidOpcode => f.write_str("Invalid Opcode"),
            Self::AuthenticationEntry => f.write_str("Authentication Entry"),
            Self::PageMiss => f.write_str("Page Miss"),
            Self::MultiplePageMiss => f.write_str("Multiple Page Miss"),
            Self::Breakpoint => f.write_str("Breakpoint Hit"),
            Self::Unknown(c) => write!(f, "Unknown ({c:#x})"),
        }
    }
}

/// A decoded `EXCI` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Raw register value.
    pub raw: u32,
}

impl ExceptionInfo {
    /// Wrap a raw `EXCI` value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self { raw }
    }

    /// `true` when the core reported an exception.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        self.raw != 0
    }

    /// Faulting program counter.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.raw & PC_MASK
    }

    /// Decoded cause.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn cause(&self) -> TrapCause {
        TrapCause::from_cause(((self.raw >> CAUSE_SHIFT) & CAUSE_MASK) as u8)
    }
}

impl core::fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} at pc {:#07x} (exci {:#010x})", self.cause(), self.pc(), self.raw)
    }
}
