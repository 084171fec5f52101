//! Clock/power sequencing for a TSEC bracket.
//!
//! [`acquire`] brings up the [`ClockSet`] in order and waits for the fuse
//! block, returning a [`ClocksUp`] guard. Dropping the guard (or calling
//! [`ClocksUp::release`]) gates the domains off again in reverse order, so a
//! bracket cannot leak enabled clocks on any exit path.
//!
//! Domains that were already running when the bracket opened are left
//! alone on both sides: the clock state after a bracket matches the state
//! before it.

use crate::error::Result;
use crate::soc::Soc;
use crate::timer::{spin_until, Timer};
use tracing::{debug, trace, warn};
use tsec_chip::car::Domain;
use tsec_chip::kfuse;

/// Reset settle time after gating a clock on.
const ENABLE_SETTLE_US: u64 = 2;

/// Ordered bundle of clock domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSet {
    domains: &'static [Domain],
}

impl ClockSet {
    /// HOST1X, TSEC, SOR_SAFE, SOR0, SOR1, KFUSE.
    pub const TSEC: Self = Self {
        domains: &Domain::TSEC_BUNDLE,
    };

    /// Domains in enable order.
    pub const fn domains(&self) -> &'static [Domain] {
        self.domains
    }
}

/// Domains currently gated on.
///
/// # Errors
///
/// Propagates register access errors.
pub fn enabled_domains(soc: &Soc, set: ClockSet) -> Result<Vec<Domain>> {
    let mut on = Vec::new();
    for &domain in set.domains() {
        if is_enabled(soc, domain)? {
            on.push(domain);
        }
    }
    Ok(on)
}

fn is_enabled(soc: &Soc, domain: Domain) -> Result<bool> {
    let regs = domain.regs();
    let enabled = soc.car.read32(regs.enable)? & regs.mask() != 0;
    let in_reset = soc.car.read32(regs.reset)? & regs.mask() != 0;
    Ok(enabled && !in_reset)
}

fn enable(soc: &Soc, timer: &dyn Timer, domain: Domain) -> Result<()> {
    let regs = domain.regs();
    let mask = regs.mask();

    soc.car.set_bits(regs.reset, mask)?;
    soc.car.clear_bits(regs.enable, mask)?;
    if let Some(source) = regs.source {
        soc.car.write32(source.reg, source.value())?;
    }
    soc.car.set_bits(regs.enable, mask)?;
    timer.delay_us(ENABLE_SETTLE_US);
    soc.car.clear_bits(regs.reset, mask)?;

    trace!("Clock {domain} enabled");
    Ok(())
}

fn disable(soc: &Soc, domain: Domain) -> Result<()> {
    let regs = domain.regs();
    soc.car.set_bits(regs.reset, regs.mask())?;
    soc.car.clear_bits(regs.enable, regs.mask())?;
    trace!("Clock {domain} disabled");
    Ok(())
}

/// Clocks held up for the duration of a bracket.
#[derive(Debug)]
pub struct ClocksUp<'a> {
    soc: &'a Soc,
    /// Domains this guard gated on, in enable order.
    owned: Vec<Domain>,
    released: bool,
}

impl ClocksUp<'_> {
    /// Domains this bracket enabled (excludes ones already running).
    pub fn owned(&self) -> &[Domain] {
        &self.owned
    }

    /// Gate the owned domains off in reverse order.
    ///
    /// Every domain is attempted even if an earlier one fails; the first
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Propagates the first register access error.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_err = None;
        for &domain in self.owned.iter().rev() {
            if let Err(e) = disable(self.soc, domain) {
                warn!("Failed to disable clock {domain}: {e}");
                first_err.get_or_insert(e);
            }
        }
        debug!("Clocks down ({} domains)", self.owned.len());
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for ClocksUp<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("Clock release during drop failed: {e}");
        }
    }
}

/// Enable `set` in order, then wait for the fuse block to finish loading.
///
/// The fuse wait has no deadline; the block signals completion on its own
/// once its clock runs. A failed fuse CRC is reported but does not fail
/// the bracket.
///
/// # Errors
///
/// Propagates register access errors. Any domain enabled before the error
/// is disabled again before returning.
pub fn acquire<'a>(soc: &'a Soc, timer: &dyn Timer, set: ClockSet) -> Result<ClocksUp<'a>> {
    let mut guard = ClocksUp {
        soc,
        owned: Vec::with_capacity(set.domains().len()),
        released: false,
    };

    for &domain in set.domains() {
        if is_enabled(soc, domain)? {
            debug!("Clock {domain} already running, leaving it to its owner");
            continue;
        }
        enable(soc, timer, domain)?;
        guard.owned.push(domain);
        if domain == Domain::Host1x {
            timer.delay_us(ENABLE_SETTLE_US);
        }
    }

    let state = spin_until(|| {
        let state = soc.kfuse.read32(kfuse::STATE)?;
        Ok((state & kfuse::state::DONE != 0).then_some(state))
    })?;
    if state & kfuse::state::CRCPASS == 0 {
        warn!("KFUSE CRC check failed (state {state:#010x})");
    }

    debug!("Clocks up ({} domains enabled)", guard.owned.len());
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{EngineModel, SimulatedSoc, SteppingTimer};

    #[test]
    fn acquire_then_release_restores_state() {
        let sim = SimulatedSoc::new(EngineModel::default());
        let soc = sim.soc();
        let timer = SteppingTimer::new(1);

        let clocks = acquire(&soc, &timer, ClockSet::TSEC).unwrap();
        assert_eq!(enabled_domains(&soc, ClockSet::TSEC).unwrap(), Domain::TSEC_BUNDLE);
        clocks.release().unwrap();
        assert!(enabled_domains(&soc, ClockSet::TSEC).unwrap().is_empty());
    }

    #[test]
    fn drop_releases_clocks() {
        let sim = SimulatedSoc::new(EngineModel::default());
        let soc = sim.soc();
        let timer = SteppingTimer::new(1);

        {
            let _clocks = acquire(&soc, &timer, ClockSet::TSEC).unwrap();
        }
        assert!(enabled_domains(&soc, ClockSet::TSEC).unwrap().is_empty());
    }

    #[test]
    fn preexisting_domains_survive_the_bracket() {
        let sim = SimulatedSoc::new(EngineModel::default());
        sim.enable_clock(Domain::Host1x);
        let soc = sim.soc();
        let timer = SteppingTimer::new(1);

        let clocks = acquire(&soc, &timer, ClockSet::TSEC).unwrap();
        assert!(!clocks.owned().contains(&Domain::Host1x));
        clocks.release().unwrap();
        assert_eq!(enabled_domains(&soc, ClockSet::TSEC).unwrap(), vec![Domain::Host1x]);
    }

    #[test]
    fn release_order_is_reverse_of_enable() {
        let sim = SimulatedSoc::new(EngineModel::default());
        let soc = sim.soc();
        let timer = SteppingTimer::new(1);

        let clocks = acquire(&soc, &timer, ClockSet::TSEC).unwrap();
        assert_eq!(clocks.owned(), Domain::TSEC_BUNDLE);
        sim.car_log().clear();
        clocks.release().unwrap();

        let disabled: Vec<Domain> = sim.car_log().disabled_order();
        let mut expected = Domain::TSEC_BUNDLE.to_vec();
        expected.reverse();
        assert_eq!(disabled, expected);
    }

    #[test]
    fn host1x_source_is_programmed() {
        let sim = SimulatedSoc::new(EngineModel::default());
        let soc = sim.soc();
        let timer = SteppingTimer::new(1);

        let _clocks = acquire(&soc, &timer, ClockSet::TSEC).unwrap();
        let value = soc.car.read32(tsec_chip::car::CLK_SOURCE_HOST1X).unwrap();
        assert_eq!(value, 0x8000_0003);
    }
}
