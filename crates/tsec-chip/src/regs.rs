//! TSEC register map (Falcon 5 core behind a 0x1000 host window).
//!
//! Falcon registers live at `0x1000 + falcon_offset`. The boot-key-version
//! and status registers are the Falcon `MAILBOX0` / `MAILBOX1` pair under the
//! names the key-derivation firmware gives them.

// ── Interrupts ───────────────────────────────────────────────────────────────

/// Interrupt mask set.
pub const IRQMSET: usize = 0x1010;
/// Interrupt destination routing.
pub const IRQDEST: usize = 0x101C;

// ── Mailboxes ────────────────────────────────────────────────────────────────

/// Falcon mailbox 0.
pub const MAILBOX0: usize = 0x1040;
/// Falcon mailbox 1.
pub const MAILBOX1: usize = 0x1044;
/// Boot key version, as read by the key-derivation firmware (aliases `MAILBOX0`).
pub const BOOTKEYVER: usize = MAILBOX0;
/// Firmware completion status (aliases `MAILBOX1`).
pub const STATUS: usize = MAILBOX1;
/// Interface enable.
pub const ITFEN: usize = 0x1048;

// ── CPU ──────────────────────────────────────────────────────────────────────

/// CPU control.
pub const CPUCTL: usize = 0x1100;
/// Boot vector (IMEM entry address).
pub const BOOTVEC: usize = 0x1104;
/// Exception information, valid after a halt.
pub const EXCI: usize = 0x11D0;

// ── DMA ──────────────────────────────────────────────────────────────────────

/// DMA control.
pub const DMACTL: usize = 0x110C;
/// DMA transfer base, physical address `>> 8`.
pub const DMATRFBASE: usize = 0x1110;
/// DMA transfer destination offset inside IMEM/DMEM.
pub const DMATRFMOFFS: usize = 0x1114;
/// DMA transfer command.
pub const DMATRFCMD: usize = 0x1118;
/// DMA transfer source offset from `DMATRFBASE`.
pub const DMATRFFBOFFS: usize = 0x111C;

/// Command error word left by the firmware.
pub const CMD_ERR: usize = 0x1498;

/// Success sentinel written to [`STATUS`] by the key-derivation firmware.
pub const STATUS_SUCCESS: u32 = 0xB0B0_B0B0;

/// Size of one DMA transfer to IMEM.
pub const DMA_BLOCK_SIZE: usize = 0x100;

pub mod irqmset {
    //! `IRQMSET` bits.

    /// Watchdog timer.
    pub const WDTMR: u32 = 1 << 1;
    /// CPU halted.
    pub const HALT: u32 = 1 << 4;
    /// External error.
    pub const EXTERR: u32 = 1 << 5;
    /// Software-generated 0.
    pub const SWGEN0: u32 = 1 << 6;
    /// Software-generated 1.
    pub const SWGEN1: u32 = 1 << 7;

    /// External interrupt lines.
    #[must_use]
    pub const fn ext(lines: u8) -> u32 {
        (lines as u32) << 8
    }
}

pub mod irqdest {
    //! `IRQDEST` bits.

    /// CPU halted.
    pub const HALT: u32 = 1 << 4;
    /// External error.
    pub const EXTERR: u32 = 1 << 5;
    /// Software-generated 0.
    pub const SWGEN0: u32 = 1 << 6;
    /// Software-generated 1.
    pub const SWGEN1: u32 = 1 << 7;

    /// External interrupt lines.
    #[must_use]
    pub const fn ext(lines: u8) -> u32 {
        (lines as u32) << 8
    }
}

pub mod itfen {
    //! `ITFEN` bits.

    /// Context interface.
    pub const CTXEN: u32 = 1 << 0;
    /// Method interface.
    pub const MTHDEN: u32 = 1 << 1;
}

pub mod cpuctl {
    //! `CPUCTL` bits.

    /// Start the Falcon CPU.
    pub const STARTCPU: u32 = 1 << 1;
    /// CPU halted. The whole register reads exactly this once the core stops.
    pub const HALTED: u32 = 1 << 4;
}

pub mod dmatrfcmd {
    //! `DMATRFCMD` bits.

    /// DMA engine idle.
    pub const IDLE: u32 = 1 << 1;
    /// Destination is IMEM (always a 256-byte block).
    pub const IMEM: u32 = 1 << 4;
    /// 256-byte transfer size, for DMEM transfers.
    pub const SIZE_256B: u32 = 6 << 8;
}

/// Interrupt mask programmed before loading.
#[must_use]
pub const fn default_irq_mask() -> u32 {
    irqmset::ext(0xFF)
        | irqmset::WDTMR
        | irqmset::HALT
        | irqmset::EXTERR
        | irqmset::SWGEN0
        | irqmset::SWGEN1
}

/// Interrupt routing programmed before loading.
#[must_use]
pub const fn default_irq_dest() -> u32 {
    irqdest::ext(0xFF) | irqdest::HALT | irqdest::EXTERR | irqdest::SWGEN0 | irqdest::SWGEN1
}
