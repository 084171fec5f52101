//! Query configuration.
//!
//! [`QueryConfig::default`] reproduces the boot-loader behaviour: fixed
//! mailboxes, bounded wait, 10 s DMA polls, 2 s execution window, 16 KiB
//! scratch. Environment overrides are read by [`QueryConfig::from_env`].

use crate::dma::SCRATCH_CAPACITY;
use crate::error::{Result, TsecError};
use crate::exec::WaitPolicy;
use std::time::Duration;
use tracing::debug;

/// Key version the boot loader passes to the firmware.
pub const DEFAULT_KEY_VERSION: u8 = 1;

/// Per-window and boot DMA idle bound.
pub const DEFAULT_DMA_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded execution window.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(2);

/// Overrides [`QueryConfig::dma_timeout`] (milliseconds).
pub const ENV_DMA_TIMEOUT_MS: &str = "TSEC_DMA_TIMEOUT_MS";
/// Overrides [`QueryConfig::exec_timeout`] (milliseconds).
pub const ENV_EXEC_TIMEOUT_MS: &str = "TSEC_EXEC_TIMEOUT_MS";
/// Overrides [`QueryConfig::wait_policy`] (`bounded` or `halt`).
pub const ENV_WAIT_POLICY: &str = "TSEC_WAIT_POLICY";

/// Knobs for one TSEC bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// Completion policy.
    pub wait_policy: WaitPolicy,
    /// Bound for every DMA idle poll.
    pub dma_timeout: Duration,
    /// Bound for the status poll under [`WaitPolicy::Bounded`].
    pub exec_timeout: Duration,
    /// Mailbox pair to write instead of the fixed sync-point convention.
    pub mailboxes: Option<[u32; 2]>,
    /// IMEM address the CPU starts at.
    pub boot_vector: u32,
    /// Scratch buffer size in bytes.
    pub scratch_capacity: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            wait_policy: WaitPolicy::Bounded,
            dma_timeout: DEFAULT_DMA_TIMEOUT,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            mailboxes: None,
            boot_vector: 0,
            scratch_capacity: SCRATCH_CAPACITY,
        }
    }
}

impl QueryConfig {
    /// Defaults with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`TsecError::InvalidConfig`] for a malformed override.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides taken from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`TsecError::InvalidConfig`] for a malformed override.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = lookup(ENV_DMA_TIMEOUT_MS) {
            config.dma_timeout = parse_millis(ENV_DMA_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_EXEC_TIMEOUT_MS) {
            config.exec_timeout = parse_millis(ENV_EXEC_TIMEOUT_MS, &ms)?;
        }
        if let Some(policy) = lookup(ENV_WAIT_POLICY) {
            config.wait_policy = policy.parse()?;
        }
        debug!("Query config: {config:?}");
        Ok(config)
    }

    /// Short timeouts for tests against the simulator.
    #[cfg(test)]
    pub fn minimal() -> Self {
        Self {
            dma_timeout: Duration::from_millis(50),
            exec_timeout: Duration::from_millis(20),
            scratch_capacity: 0x1000,
            ..Self::default()
        }
    }

    /// Set the completion policy.
    #[must_use]
    pub const fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    /// Set the DMA idle bound.
    #[must_use]
    pub const fn with_dma_timeout(mut self, timeout: Duration) -> Self {
        self.dma_timeout = timeout;
        self
    }

    /// Set the execution window.
    #[must_use]
    pub const fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Write this mailbox pair before starting the CPU.
    #[must_use]
    pub const fn with_mailboxes(mut self, mailbox0: u32, mailbox1: u32) -> Self {
        self.mailboxes = Some([mailbox0, mailbox1]);
        self
    }

    /// Set the boot vector.
    #[must_use]
    pub const fn with_boot_vector(mut self, vector: u32) -> Self {
        self.boot_vector = vector;
        self
    }

    /// Set the scratch capacity.
    #[must_use]
    pub const fn with_scratch_capacity(mut self, bytes: usize) -> Self {
        self.scratch_capacity = bytes;
        self
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| TsecError::invalid_config(format!("{key}={value:?}: {e}")))
}
