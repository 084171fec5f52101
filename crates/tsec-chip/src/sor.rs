//! SOR1 HDCP shadow registers.
//!
//! The key-derivation firmware has no path back to host memory, so it parks
//! its 16-byte result in four HDCP key-selection-vector registers of the
//! second display output. They are read in this order and packed
//! little-endian to form the key.

/// DisplayPort HDCP BKSV, low word.
pub const DP_HDCP_BKSV_LSB: usize = 0x1E8;
/// TMDS HDCP CN, high word.
pub const TMDS_HDCP_CN_MSB: usize = 0x208;
/// TMDS HDCP CN, low word.
pub const TMDS_HDCP_CN_LSB: usize = 0x20C;
/// TMDS HDCP BKSV, low word.
pub const TMDS_HDCP_BKSV_LSB: usize = 0x21C;

/// Result words in key order: word `i` becomes key bytes `4*i..4*i+4`.
pub const RESULT_REGS: [usize; 4] = [
    DP_HDCP_BKSV_LSB,
    TMDS_HDCP_BKSV_LSB,
    TMDS_HDCP_CN_MSB,
    TMDS_HDCP_CN_LSB,
];
