//! End-to-end query tests
//!
//! Runs the whole bracket against the simulated SoC and checks the
//! guarantees callers rely on: key only on success, context always
//! recorded, clocks restored on every path.

use tsec_chip::car::Domain;
use tsec_chip::host1x;
use tsec_chip::regs::STATUS_SUCCESS;
use tsec_chip::sor::RESULT_REGS;
use tsec_driver::clock::{enabled_domains, ClockSet};
use tsec_driver::sim::{EngineModel, Outcome, SimulatedSoc, SteppingTimer, SIM_KEY};
use tsec_driver::{
    ExecutionContext, PackageOffsets, QueryConfig, ResultKey, Tsec, TsecError, WaitPolicy,
    KEY_LEN,
};

const UNTOUCHED: [u8; KEY_LEN] = [0xEE; KEY_LEN];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tsec_driver=debug")
        .with_test_writer()
        .try_init();
}

fn driver(model: EngineModel, config: QueryConfig) -> (SimulatedSoc, Tsec) {
    init_tracing();
    let sim = SimulatedSoc::new(model);
    let tsec = Tsec::new(sim.soc(), Box::new(SteppingTimer::new(100)), config);
    (sim, tsec)
}

fn with_outcome(outcome: Outcome) -> EngineModel {
    EngineModel {
        outcome,
        ..EngineModel::default()
    }
}

fn firmware() -> Vec<u8> {
    vec![0x5A; 0xF00]
}

fn assert_clocks_off(tsec: &Tsec) {
    assert!(enabled_domains(tsec.soc(), ClockSet::TSEC).unwrap().is_empty());
}

#[test]
fn success_extracts_key_and_clears_side_channel() {
    let (sim, mut tsec) = driver(EngineModel::default(), QueryConfig::default());
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    tsec.query(&mut key, 1, &mut ctx).unwrap();

    assert_eq!(key, *ResultKey::from_words(SIM_KEY).as_bytes());
    assert_eq!(key.to_vec(), (1..=16).collect::<Vec<u8>>());
    for &reg in &RESULT_REGS {
        assert_eq!(sim.sor1.peek(reg), 0, "SOR1 {reg:#x} not cleared");
    }
    assert_eq!(sim.host1x.peek(host1x::CH0_SYNC_SYNCPT_160), 0);
    assert_eq!(ctx.status, STATUS_SUCCESS);
    assert_eq!(ctx.exception_info, 0);
    assert_clocks_off(&tsec);
}

#[test]
fn key_version_reaches_the_firmware() {
    let (sim, mut tsec) = driver(EngineModel::default(), QueryConfig::default());
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = [0u8; KEY_LEN];

    tsec.query(&mut key, 3, &mut ctx).unwrap();

    let boot = sim.tsec.boot().unwrap();
    assert_eq!(boot.mailbox0, 3);
    assert_eq!(boot.syncpt_160, host1x::SYNCPT_160_MAGIC);
}

#[test]
fn silent_firmware_times_out_without_key() {
    let (_sim, mut tsec) = driver(with_outcome(Outcome::Silent), QueryConfig::default());
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();

    assert!(matches!(err, TsecError::ExecutionTimeout { .. }));
    assert_eq!(err.code(), -4);
    assert_eq!(key, UNTOUCHED);
    assert_eq!(ctx.status, 0);
    assert_clocks_off(&tsec);
}

#[test]
fn wrong_status_is_reported_without_key() {
    let model = EngineModel {
        cmd_err: 0x0000_0042,
        ..with_outcome(Outcome::Status(0xDEAD_BEEF))
    };
    let (sim, mut tsec) = driver(model, QueryConfig::default());
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();

    assert!(matches!(err, TsecError::BadFinalStatus { status: 0xDEAD_BEEF }));
    assert_eq!(key, UNTOUCHED);
    assert_eq!(ctx.status, 0xDEAD_BEEF);
    assert_eq!(ctx.cmd_err, 0x42);
    assert_eq!(sim.host1x.peek(host1x::CH0_SYNC_SYNCPT_160), host1x::SYNCPT_160_MAGIC);
    assert_clocks_off(&tsec);
}

#[test]
fn handshake_sentinel_in_status_mailbox_is_rejected() {
    let config = QueryConfig::default().with_mailboxes(0x1, STATUS_SUCCESS);
    let (sim, mut tsec) = driver(with_outcome(Outcome::Silent), config);
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();

    assert!(matches!(err, TsecError::InvalidConfig { .. }));
    assert_eq!(key, UNTOUCHED);
    assert!(sim.tsec.boot().is_none());
    assert!(sim.car_log().enabled_order().is_empty());
}

#[test]
fn handshake_with_bounded_wait_needs_clear_status() {
    let config = QueryConfig::default().with_mailboxes(0x1, 0x2);
    let (sim, mut tsec) = driver(with_outcome(Outcome::Silent), config);
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();

    assert_eq!(err.code(), -10);
    assert_eq!(key, UNTOUCHED);
    assert!(sim.tsec.boot().is_none());
}

#[test]
fn handshake_silent_firmware_times_out() {
    let config = QueryConfig::default().with_mailboxes(0x1, 0);
    let (sim, mut tsec) = driver(with_outcome(Outcome::Silent), config);
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();

    assert!(matches!(err, TsecError::ExecutionTimeout { .. }));
    assert_eq!(key, UNTOUCHED);
    assert_eq!(ctx.status, 0);
    let boot = sim.tsec.boot().unwrap();
    assert_eq!((boot.mailbox0, boot.mailbox1), (0x1, 0));
    assert_clocks_off(&tsec);
}

#[test]
fn handshake_with_halt_wait_reports_fault() {
    let config = QueryConfig::default()
        .with_mailboxes(0x1, 0x2)
        .with_wait_policy(WaitPolicy::Halt);
    let (sim, mut tsec) = driver(with_outcome(Outcome::Fault { exci: 0x0040_0100 }), config);
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();

    assert_eq!(err.code(), -6);
    assert_eq!(key, UNTOUCHED);
    assert_eq!(ctx.status, 0x2);
    assert_eq!(sim.tsec.boot().unwrap().mailbox1, 0x2);
    assert_clocks_off(&tsec);
}

#[test]
fn halt_policy_reports_fault() {
    let config = QueryConfig::default().with_wait_policy(WaitPolicy::Halt);
    let (_sim, mut tsec) = driver(with_outcome(Outcome::Fault { exci: 0x0060_0ABC }), config);
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();

    assert_eq!(err.code(), -6);
    let info = err.exception().unwrap();
    assert_eq!(info.pc(), 0xABC);
    assert_eq!(ctx.exception_info, 0x0060_0ABC);
    assert_eq!(key, UNTOUCHED);
    assert_clocks_off(&tsec);
}

#[test]
fn halt_policy_still_requires_sentinel() {
    let config = QueryConfig::default().with_wait_policy(WaitPolicy::Halt);
    let (_sim, mut tsec) = driver(with_outcome(Outcome::Status(1)), config);
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();

    assert!(matches!(err, TsecError::BadFinalStatus { status: 1 }));
    assert_eq!(key, UNTOUCHED);
}

#[test]
fn halt_policy_success_extracts_key() {
    let config = QueryConfig::default().with_wait_policy(WaitPolicy::Halt);
    let (_sim, mut tsec) = driver(EngineModel::default(), config);
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    tsec.query(&mut key, 1, &mut ctx).unwrap();
    assert_eq!(key[0], 1);
    assert_eq!(key[15], 16);
}

#[test]
fn load_failure_still_records_context_and_drops_clocks() {
    let model = EngineModel {
        dma_idle_at_reset: false,
        ..EngineModel::default()
    };
    let (sim, mut tsec) = driver(model, QueryConfig::default());
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    ctx.status = 0x1234;
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();

    assert_eq!(err.code(), -1);
    assert_eq!(ctx.status, 0);
    assert!(sim.tsec.boot().is_none());
    assert_eq!(key, UNTOUCHED);

    let log = sim.car_log();
    let mut reversed = log.enabled_order();
    reversed.reverse();
    assert_eq!(log.disabled_order(), reversed);
    drop(log);
    assert_clocks_off(&tsec);
}

#[test]
fn boot_timeout_is_distinct() {
    let model = EngineModel {
        boot_dma_stuck: true,
        ..EngineModel::default()
    };
    let (_sim, mut tsec) = driver(model, QueryConfig::default());
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();
    assert!(matches!(err, TsecError::BootTimeout { .. }));
    assert_eq!(key, UNTOUCHED);
    assert_clocks_off(&tsec);
}

#[test]
fn oversized_firmware_is_rejected() {
    let config = QueryConfig::default().with_scratch_capacity(0x100);
    let (_sim, mut tsec) = driver(EngineModel::default(), config);
    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = UNTOUCHED;

    let err = tsec.query(&mut key, 1, &mut ctx).unwrap_err();
    assert_eq!(err.code(), -7);
    assert_clocks_off(&tsec);
}

#[test]
fn clocks_enabled_by_others_stay_enabled() {
    let sim = SimulatedSoc::new(EngineModel::default());
    sim.enable_clock(Domain::Host1x);
    sim.enable_clock(Domain::Kfuse);
    let mut tsec = Tsec::new(sim.soc(), Box::new(SteppingTimer::new(100)), QueryConfig::default());
    let before = enabled_domains(tsec.soc(), ClockSet::TSEC).unwrap();

    let fw = firmware();
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = [0u8; KEY_LEN];
    tsec.query(&mut key, 1, &mut ctx).unwrap();

    assert_eq!(enabled_domains(tsec.soc(), ClockSet::TSEC).unwrap(), before);
    assert!(!sim.car_log().disabled_order().contains(&Domain::Host1x));
}

#[test]
fn package_offsets_are_carried_untouched() {
    let (_sim, mut tsec) = driver(EngineModel::default(), QueryConfig::default());
    let fw = firmware();
    let offsets = PackageOffsets {
        pkg11_offset: 0x4000,
        secmon_base: 0x4002_5000,
    };
    let mut ctx = ExecutionContext::new(&fw).with_package(offsets);
    let mut key = [0u8; KEY_LEN];

    tsec.query(&mut key, 1, &mut ctx).unwrap();
    assert_eq!(ctx.package, Some(offsets));
    assert_eq!(ctx.firmware, fw.as_slice());
}

#[test]
fn repeated_queries_each_bracket_clocks() {
    let (sim, mut tsec) = driver(EngineModel::default(), QueryConfig::default());
    let fw = firmware();
    for _ in 0..3 {
        let mut ctx = ExecutionContext::new(&fw);
        let mut key = [0u8; KEY_LEN];
        tsec.query(&mut key, 1, &mut ctx).unwrap();
        assert_clocks_off(&tsec);
    }
    assert_eq!(sim.car_log().enabled_order().len(), 3 * Domain::TSEC_BUNDLE.len());
}

#[test]
#[ignore] // Requires hardware and a reserved carveout
fn test_query_on_hardware() {
    let fw = std::fs::read("tsec_fw.bin").expect("firmware image");
    let soc = tsec_driver::Soc::map_devmem(0x8000_0000, 0x4000).expect("map /dev/mem");
    let mut tsec = Tsec::with_system_timer(soc, QueryConfig::default());
    let mut ctx = ExecutionContext::new(&fw);
    let mut key = [0u8; KEY_LEN];
    tsec.query(&mut key, 1, &mut ctx).expect("query");
    println!("status {:#010x} cmd_err {:#010x}", ctx.status, ctx.cmd_err);
}
