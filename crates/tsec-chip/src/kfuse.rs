//! KFUSE state register.

/// Fuse state.
pub const STATE: usize = 0x80;

pub mod state {
    //! `STATE` bits.

    /// Fuse load finished.
    pub const DONE: u32 = 1 << 16;
    /// Fuse CRC check passed.
    pub const CRCPASS: u32 = 1 << 17;
}
