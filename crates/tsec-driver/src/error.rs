//! Error types for TSEC driver operations

use thiserror::Error;
use tsec_chip::base::Block;
use tsec_chip::exception::ExceptionInfo;

/// Result type alias for TSEC operations
pub type Result<T> = std::result::Result<T, TsecError>;

/// Errors that can occur while driving the TSEC engine.
///
/// Every variant carries a stable numeric code (see [`TsecError::code`]) so
/// boot-stage callers can report failures without string matching. Codes are
/// never reused between variants.
#[derive(Debug, Error)]
pub enum TsecError {
    /// DMA engine was not idle before the first transfer
    #[error("TSEC DMA not idle before load (waited {waited_ms}ms)")]
    ConfigurationTimeout {
        /// Time spent polling
        waited_ms: u64,
    },

    /// One IMEM transfer window never completed
    #[error("TSEC DMA window at IMEM offset {offset:#x} timed out after {waited_ms}ms")]
    TransferTimeout {
        /// IMEM offset of the stuck window
        offset: u32,
        /// Time spent polling
        waited_ms: u64,
    },

    /// DMA engine did not settle after the CPU start bit was set
    #[error("TSEC DMA not idle after CPU start (waited {waited_ms}ms)")]
    BootTimeout {
        /// Time spent polling
        waited_ms: u64,
    },

    /// Firmware never wrote a status word
    #[error("TSEC firmware reported no status within {waited_ms}ms")]
    ExecutionTimeout {
        /// Time spent polling
        waited_ms: u64,
    },

    /// Firmware finished with something other than the success sentinel
    #[error("TSEC final status {status:#010x}, expected 0xb0b0b0b0")]
    BadFinalStatus {
        /// Raw status word
        status: u32,
    },

    /// Falcon core halted with a nonzero exception-info word
    #[error("TSEC execution faulted (exci {exception_info:#010x})")]
    FaultedExecution {
        /// Raw `EXCI` value
        exception_info: u32,
    },

    /// Firmware image does not fit the scratch buffer
    #[error("Firmware of {len} bytes does not fit the {capacity}-byte scratch buffer")]
    FirmwareTooLarge {
        /// Image length
        len: usize,
        /// Scratch capacity
        capacity: usize,
    },

    /// Register access outside a block's window, or not word aligned
    #[error("Register access out of bounds: {block} offset {offset:#x} (window {size:#x})")]
    RegisterOutOfBounds {
        /// Block being accessed
        block: Block,
        /// Requested offset
        offset: usize,
        /// Window size
        size: usize,
    },

    /// A register block or DMA carveout could not be mapped
    #[error("Cannot map {what}: {source}")]
    Mapping {
        /// What was being mapped
        what: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration value rejected
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Reason for rejection
        reason: String,
    },

    /// Scratch buffer bus address not expressible in the DMA base register
    #[error("DMA bus address {address:#x} not reachable by TSEC")]
    DmaAddress {
        /// Offending bus address
        address: u64,
    },

    /// Bracket operation called out of order
    #[error("Invalid bracket state: {operation} needs {expected}, bracket is {actual}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// State the operation needs
        expected: &'static str,
        /// Current state
        actual: &'static str,
    },
}

impl TsecError {
    /// Stable diagnostic code.
    ///
    /// | Code | Variant |
    /// |------|---------|
    /// | -1 | `ConfigurationTimeout` |
    /// | -2 | `TransferTimeout` |
    /// | -3 | `BootTimeout` |
    /// | -4 | `ExecutionTimeout` |
    /// | -5 | `BadFinalStatus` |
    /// | -6 | `FaultedExecution` |
    /// | -7 | `FirmwareTooLarge` |
    /// | -8 | `RegisterOutOfBounds` |
    /// | -9 | `Mapping` |
    /// | -10 | `InvalidConfig` |
    /// | -11 | `DmaAddress` |
    /// | -12 | `InvalidState` |
    pub const fn code(&self) -> i32 {
        match self {
            Self::ConfigurationTimeout { .. } => -1,
            Self::TransferTimeout { .. } => -2,
            Self::BootTimeout { .. } => -3,
            Self::ExecutionTimeout { .. } => -4,
            Self::BadFinalStatus { .. } => -5,
            Self::FaultedExecution { .. } => -6,
            Self::FirmwareTooLarge { .. } => -7,
            Self::RegisterOutOfBounds { .. } => -8,
            Self::Mapping { .. } => -9,
            Self::InvalidConfig { .. } => -10,
            Self::DmaAddress { .. } => -11,
            Self::InvalidState { .. } => -12,
        }
    }

    /// `true` for the four bounded-poll expiries.
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationTimeout { .. }
                | Self::TransferTimeout { .. }
                | Self::BootTimeout { .. }
                | Self::ExecutionTimeout { .. }
        )
    }

    /// Decoded exception info for a faulted execution.
    pub const fn exception(&self) -> Option<ExceptionInfo> {
        match self {
            Self::FaultedExecution { exception_info } => Some(ExceptionInfo::new(*exception_info)),
            _ => None,
        }
    }

    /// Create a mapping error
    pub fn mapping(what: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        Self::Mapping {
            what: what.into(),
            source: source.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_variant() -> Vec<TsecError> {
        vec![
            TsecError::ConfigurationTimeout { waited_ms: 1 },
            TsecError::TransferTimeout { offset: 0x100, waited_ms: 1 },
            TsecError::BootTimeout { waited_ms: 1 },
            TsecError::ExecutionTimeout { waited_ms: 1 },
            TsecError::BadFinalStatus { status: 1 },
            TsecError::FaultedExecution { exception_info: 0x0040_0000 },
            TsecError::FirmwareTooLarge { len: 2, capacity: 1 },
            TsecError::RegisterOutOfBounds { block: Block::Tsec, offset: 0, size: 0 },
            TsecError::mapping("TSEC", std::io::Error::from(std::io::ErrorKind::NotFound)),
            TsecError::invalid_config("bad"),
            TsecError::DmaAddress { address: 1 << 48 },
            TsecError::InvalidState { operation: "start", expected: "loaded", actual: "clocks-up" },
        ]
    }

    #[test]
    fn codes_are_distinct() {
        let codes: Vec<i32> = every_variant().iter().map(TsecError::code).collect();
        for (i, a) in codes.iter().enumerate() {
            assert!(!codes[i + 1..].contains(a), "code {a} reused");
        }
    }

    #[test]
    fn only_polls_are_timeouts() {
        let timeouts = every_variant().iter().filter(|e| e.is_timeout()).count();
        assert_eq!(timeouts, 4);
    }

    #[test]
    fn fault_exposes_decoded_cause() {
        let err = TsecError::FaultedExecution { exception_info: 0x0040_0010 };
        let info = err.exception().unwrap();
        assert_eq!(info.cause(), tsec_chip::exception::TrapCause::InvalidOpcode);
        assert!(err.to_string().contains("0x00400010"));
        assert!(TsecError::BootTimeout { waited_ms: 0 }.exception().is_none());
    }
}
