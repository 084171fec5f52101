//! HOST1X sync-point registers.
//!
//! The key-derivation firmware waits on sync point 160 holding a magic value
//! before it proceeds; the host clears it again once the result is read.

/// Channel 0 sync block base.
pub const CH0_SYNC_BASE: usize = 0x2100;

/// Sync point 160, used as the boot handshake with the TSEC firmware.
pub const CH0_SYNC_SYNCPT_160: usize = CH0_SYNC_BASE + 0x1200;

/// Handshake value the firmware expects in [`CH0_SYNC_SYNCPT_160`].
pub const SYNCPT_160_MAGIC: u32 = 0x34C2_E1DA;
