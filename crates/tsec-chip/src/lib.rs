//! Silicon model for the Tegra X1 TSEC engine and the blocks it leans on.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure description of the silicon: physical base addresses, register
//! offsets and bit definitions, the clock domains the engine needs, and the
//! layout of the Falcon exception-info word.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`base`] | Physical base addresses and window sizes of every block |
//! | [`regs`] | TSEC (Falcon) register map and bit definitions |
//! | [`host1x`] | HOST1X sync-point register used as the boot handshake |
//! | [`sor`] | SOR1 HDCP shadow registers reused as the result side channel |
//! | [`kfuse`] | KFUSE state register |
//! | [`car`] | Clock-and-reset controller registers and the domain table |
//! | [`exception`] | Falcon `EXCI` decoding into trap causes |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod base;
pub mod car;
pub mod exception;
pub mod host1x;
pub mod kfuse;
pub mod regs;
pub mod sor;
