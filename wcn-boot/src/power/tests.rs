use super::{DomainState, PowerDomainController, PowerTiming, Rail, MAX_RAIL_USERS, WIFI_PA_GAP_US};
use crate::aon::{Aon, IP_STOP_ALL};
use crate::poll::{PollConfig, PollTimeout};
use crate::regs::map::{aon_apb, pmu_apb, wcn_aon_ahb, wcn_aon_apb};
use crate::regs::{BlockKind, CLEAR_ALIAS_OFFSET, SET_ALIAS_OFFSET};
use crate::testing::{Action, Bench};
use crate::Error;

fn controller(bench: &Bench) -> PowerDomainController<'_> {
    PowerDomainController::new(&bench.regs, &bench.rails, PollConfig::new(), PowerTiming::new())
}

/// Sum of the delays recorded between two actions.
fn slept_between(actions: &[Action], from: &Action, to: &Action) -> u64 {
    let start = actions.iter().position(|a| a == from).unwrap();
    let end = actions.iter().position(|a| a == to).unwrap();
    actions[start..end]
        .iter()
        .map(|a| match a {
            Action::Delay(us) => *us,
            _ => 0,
        })
        .sum()
}

#[test]
fn first_acquire_switches_rails_in_order() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();

    domain.acquire_shared_power(&mut delay, true).unwrap();

    assert_eq!(
        bench.trace.rails(),
        [
            (Rail::Dcxo1v8, true),
            (Rail::Vddcon, true),
            (Rail::Merlion, true),
            (Rail::WifiPa, true),
        ]
    );
    let gap = slept_between(
        &bench.trace.actions(),
        &Action::Rail(Rail::Merlion, true),
        &Action::Rail(Rail::WifiPa, true),
    );
    assert!(gap >= WIFI_PA_GAP_US as u64, "only {}us before vddwifipa", gap);
}

#[test]
fn only_edges_touch_the_regulators() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();

    domain.acquire_shared_power(&mut delay, true).unwrap();
    bench.trace.clear();

    domain.acquire_shared_power(&mut delay, false).unwrap();
    assert!(bench.trace.rails().is_empty());
    assert_eq!(domain.counters().merlion.count(), 2);
    assert_eq!(domain.counters().wifi_pa.count(), 1);

    domain.release_shared_power(&mut delay, false).unwrap();
    assert!(bench.trace.rails().is_empty());

    domain.release_shared_power(&mut delay, true).unwrap();
    assert_eq!(
        bench.trace.rails(),
        [
            (Rail::WifiPa, false),
            (Rail::Merlion, false),
            (Rail::Vddcon, false),
            (Rail::Dcxo1v8, false),
        ]
    );
    assert_eq!(domain.counters().dcxo1v8.count(), 0);
}

#[test]
fn failed_rail_gives_back_earlier_ones() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();
    bench.rails.fail_enable(Some(Rail::Vddcon));

    let err = domain.acquire_shared_power(&mut delay, true).unwrap_err();

    assert_eq!(err, Error::Rail(super::RailError { rail: Rail::Vddcon }));
    assert_eq!(bench.trace.rails(), [(Rail::Dcxo1v8, true), (Rail::Dcxo1v8, false)]);
    for rail in [Rail::Dcxo1v8, Rail::Vddcon, Rail::Merlion, Rail::WifiPa] {
        assert_eq!(domain.counters().get(rail).count(), 0);
        assert!(!bench.rails.is_enabled(rail));
    }
}

#[test]
fn failed_wifi_pa_releases_base_rails() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();
    bench.rails.fail_enable(Some(Rail::WifiPa));

    assert!(domain.acquire_shared_power(&mut delay, true).is_err());
    assert_eq!(domain.counters().merlion.count(), 0);
    assert_eq!(domain.counters().wifi_pa.count(), 0);
    assert!(!bench.rails.is_enabled(Rail::Dcxo1v8));

    // GNSS-style users do not need the PA at all.
    domain.acquire_shared_power(&mut delay, false).unwrap();
    assert!(bench.rails.is_enabled(Rail::Merlion));
}

#[test]
fn counts_saturate_with_an_error() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();

    for _ in 0..MAX_RAIL_USERS {
        domain.acquire_shared_power(&mut delay, false).unwrap();
    }
    let err = domain.acquire_shared_power(&mut delay, false).unwrap_err();

    assert_eq!(err, Error::RefCountOverflow { rail: Rail::Dcxo1v8 });
    assert_eq!(domain.counters().dcxo1v8.count(), MAX_RAIL_USERS);
    assert_eq!(domain.counters().merlion.count(), MAX_RAIL_USERS);
}

#[test]
fn release_without_users_is_harmless() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();

    domain.release_shared_power(&mut delay, true).unwrap();
    assert!(bench.trace.rails().is_empty());
    assert_eq!(domain.counters().vddcon.count(), 0);
}

#[test]
fn release_all_rails_forgets_every_user() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();
    domain.acquire_shared_power(&mut delay, true).unwrap();
    domain.acquire_shared_power(&mut delay, false).unwrap();
    bench.trace.clear();

    domain.release_all_rails();

    assert_eq!(
        bench.trace.rails(),
        [
            (Rail::WifiPa, false),
            (Rail::Merlion, false),
            (Rail::Vddcon, false),
            (Rail::Dcxo1v8, false),
        ]
    );
    assert_eq!(domain.counters().merlion.count(), 0);
}

#[test]
fn domain_power_up_sequence() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();
    Aon::new(&bench.regs).set_force_unshutdown(true).unwrap();
    bench.trace.clear();

    domain.domain_power_up(&mut delay).unwrap();

    assert_eq!(domain.state(), DomainState::On);
    assert!(bench.regs.domain_on());

    use pmu_apb::{wcn_sys_cfg as cfg, wcn_sys_sleep_ctrl as sleep_ctrl};
    let writes = bench.trace.writes();
    assert_eq!(
        &writes[..5],
        [
            Action::Write(BlockKind::PmuApb, cfg::OFFSET + CLEAR_ALIAS_OFFSET, cfg::XTL_PLL_DELAY.mask()),
            Action::Write(BlockKind::PmuApb, cfg::OFFSET + SET_ALIAS_OFFSET, 0x0204 << 8),
            Action::Write(BlockKind::PmuApb, cfg::OFFSET + CLEAR_ALIAS_OFFSET, cfg::AUTO_SHUTDOWN.mask()),
            Action::Write(BlockKind::PmuApb, cfg::OFFSET + CLEAR_ALIAS_OFFSET, cfg::FORCE_SHUTDOWN.mask()),
            Action::Write(
                BlockKind::PmuApb,
                sleep_ctrl::OFFSET + CLEAR_ALIAS_OFFSET,
                sleep_ctrl::FORCE_DEEP_SLEEP.mask()
            ),
        ]
    );
    // PLL lock wait.
    assert!(bench.trace.contains(&Action::Delay(PowerTiming::new().pll_lock_us as u64)));
}

#[test]
fn domain_power_up_waits_for_both_subsystems() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();

    // Without force-unshutdown the idle subsystems never report awake.
    let err = domain.domain_power_up(&mut delay).unwrap_err();

    assert_eq!(
        err,
        Error::PollTimeout(PollTimeout {
            what: "btwf wakeup",
            attempts: PollConfig::new().max_attempts,
        })
    );
    assert_eq!(domain.state(), DomainState::Off);
}

#[test]
fn stuck_domain_times_out_on_poweron() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();
    bench.regs.set_domain_stuck_off(true);

    let err = domain.domain_power_up(&mut delay).unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(
        err,
        Error::PollTimeout(PollTimeout {
            what: "wcn sys poweron",
            attempts: PollConfig::new().max_attempts,
        })
    );
    assert!(!domain.hw_powered().unwrap());
}

#[test]
fn domain_power_down_waits_for_shutdown() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();
    Aon::new(&bench.regs).set_force_unshutdown(true).unwrap();
    domain.domain_power_up(&mut delay).unwrap();
    assert!(domain.hw_powered().unwrap());

    domain.domain_power_down(&mut delay).unwrap();

    assert_eq!(domain.state(), DomainState::Off);
    assert!(!bench.regs.domain_on());
    assert_eq!(bench.regs.peek(BlockKind::WcnAonAhb, wcn_aon_ahb::ip_stop::OFFSET), IP_STOP_ALL);
    assert!(!domain.hw_powered().unwrap());
}

#[test]
fn force_deep_to_shutdown_takes_the_domain_down() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();
    Aon::new(&bench.regs).set_force_unshutdown(true).unwrap();
    domain.domain_power_up(&mut delay).unwrap();

    domain.force_deep_to_shutdown(&mut delay).unwrap();

    assert_eq!(domain.state(), DomainState::Off);
    assert!(domain.is_deepsleep().unwrap());
    assert!(domain.is_shutdown().unwrap());
}

#[test]
fn forbid_deep_sleep_restores_the_override() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();
    let aon = Aon::new(&bench.regs);
    aon.set_force_unshutdown(true).unwrap();
    domain.domain_power_up(&mut delay).unwrap();
    domain.allow_deep_sleep().unwrap();
    aon.set_force_unshutdown(false).unwrap();

    domain.forbid_deep_sleep(&mut delay).unwrap();

    assert_eq!(bench.regs.peek(BlockKind::WcnAonAhb, wcn_aon_ahb::ip_stop::OFFSET), 0);
    assert!(!aon.force_exit_asserted().unwrap());
    assert!(bench.trace.contains(&Action::Write(
        BlockKind::AonApb,
        aon_apb::btwf_sleep_override::OFFSET + CLEAR_ALIAS_OFFSET,
        aon_apb::btwf_sleep_override::FORCE_EXIT_DEEP_SLEEP_N.mask(),
    )));
}

#[test]
fn forbid_deep_sleep_on_a_dead_domain_fails_cleanly() {
    let bench = Bench::new();
    let domain = controller(&bench);
    let mut delay = bench.delay();

    let err = domain.forbid_deep_sleep(&mut delay).unwrap_err();

    assert!(err.is_timeout());
    assert!(!Aon::new(&bench.regs).force_exit_asserted().unwrap());
    // The sentinel is only cleared once the domain is confirmed up.
    assert!(!bench
        .trace
        .writes()
        .iter()
        .any(|w| matches!(w, Action::Write(BlockKind::WcnAonAhb, off, _) if *off == wcn_aon_ahb::ip_stop::OFFSET)));
}

#[test]
fn pll_stable_time_fields() {
    let bench = Bench::new();
    let domain = controller(&bench);

    domain.program_pll_stable_time().unwrap();

    let field = |offset, f: crate::regs::Field| f.get(bench.regs.peek(BlockKind::WcnAonApb, offset));
    assert_eq!(field(wcn_aon_apb::pll0_wait::OFFSET, wcn_aon_apb::pll0_wait::COUNT), 0x1458);
    assert_eq!(field(wcn_aon_apb::pll2_wait::OFFSET, wcn_aon_apb::pll2_wait::COUNT), 0x1458);
    assert_eq!(field(wcn_aon_apb::xtlbuf_wait::OFFSET, wcn_aon_apb::xtlbuf_wait::COUNT), 0x37);
    assert_eq!(field(wcn_aon_apb::xtl_wait::OFFSET, wcn_aon_apb::xtl_wait::COUNT), 0x7);
}
