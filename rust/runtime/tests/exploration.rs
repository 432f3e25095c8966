//! Properties an explorer relies on: clone independence, hashing that
//! ignores diagnostics, schedule robustness, and deadlock detection.

#[allow(dead_code)]
mod helpers;

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use proptest::test_runner::{Config, RngAlgorithm, TestRng, TestRunner};
use prt_runtime::{
    MachineId, MachineStatus, RuntimeConfig, RuntimeState, ScriptedChoice, SeededChoice,
    Temperature,
};

use helpers::{drain, runtime, SEED};

fn make_runner(cases: u32) -> TestRunner {
    TestRunner::new_with_rng(
        Config {
            cases,
            ..Config::default()
        },
        TestRng::from_seed(RngAlgorithm::ChaCha, &SEED),
    )
}

#[test]
fn clone_is_independent_of_original() {
    let mut rt = runtime(helpers::ping_pong(2));
    rt.create_main_machine("Client").unwrap();
    rt.run_machine(MachineId(0)).unwrap();
    let before = rt.fingerprint();

    let mut branch = rt.clone();
    assert_eq!(branch.fingerprint(), before);
    drain(&mut branch);

    assert_eq!(rt.fingerprint(), before);
    assert_ne!(branch.fingerprint(), before);
    assert_eq!(rt.machines().len(), 2);
    assert!(!rt.machine(MachineId(0)).unwrap().is_halted());
    assert!(branch.machine(MachineId(0)).unwrap().is_halted());
}

#[test]
fn clone_resumes_mid_function_like_original() {
    let mut rt = runtime(helpers::deferral(None));
    rt.create_main_machine("Consumer").unwrap();
    rt.run_machine(MachineId(0)).unwrap();
    rt.run_machine(MachineId(0)).unwrap();
    // Producer is suspended after its first send.
    rt.run_machine(MachineId(1)).unwrap();

    let mut branch = rt.clone();
    drain(&mut rt);
    drain(&mut branch);
    assert_eq!(rt.fingerprint(), branch.fingerprint());
    assert_eq!(rt.state_hash(), branch.state_hash());
}

#[test]
fn hash_ignores_diagnostic_trace() {
    let run = |record_trace: bool| {
        let config = RuntimeConfig {
            record_trace,
            ..RuntimeConfig::default()
        };
        let mut rt = RuntimeState::new(helpers::ping_pong(2), config);
        rt.create_main_machine("Client").unwrap();
        drain(&mut rt);
        rt
    };
    let traced = run(true);
    let silent = run(false);
    assert!(!traced.trace().lines().is_empty());
    assert!(silent.trace().lines().is_empty());
    assert_eq!(traced.fingerprint(), silent.fingerprint());

    let mut with_provider = traced.clone();
    with_provider.set_choice_provider(Arc::new(SeededChoice::new(1)));
    assert_eq!(with_provider.fingerprint(), traced.fingerprint());
}

#[test]
fn nondet_branches_are_distinguished_by_fingerprint() {
    let mut rt = runtime(helpers::chooser());
    rt.create_main_machine("Chooser").unwrap();
    let root = rt.fingerprint();

    let mut seen = BTreeSet::new();
    for choice in [true, false, true] {
        let mut branch = rt.clone();
        branch.set_choice_provider(Arc::new(ScriptedChoice::new([choice])));
        drain(&mut branch);
        seen.insert(branch.fingerprint());
    }
    assert_eq!(seen.len(), 2, "revisiting the true branch hashes the same");
    assert!(!seen.contains(&root));
}

#[test]
fn seeded_fallback_is_copied_into_clones() {
    for seed in 0..16 {
        let config = RuntimeConfig {
            fallback_seed: Some(seed),
            ..RuntimeConfig::default()
        };
        let fresh = || {
            let mut rt = RuntimeState::new(helpers::chooser(), config.clone());
            rt.create_main_machine("Chooser").unwrap();
            rt
        };
        let mut original = fresh();
        let mut branch = original.clone();
        let mut rerun = fresh();
        drain(&mut original);
        drain(&mut branch);
        drain(&mut rerun);

        let chosen = |rt: &RuntimeState| rt.machine(MachineId(0)).unwrap().field(0);
        assert_eq!(chosen(&original), chosen(&branch), "seed {seed}");
        assert_eq!(chosen(&original), chosen(&rerun), "seed {seed}");
    }
}

#[test]
fn hot_monitor_with_no_enabled_machine_is_deadlock() {
    helpers::init_tracing();
    let mut rt = runtime(helpers::monitored(false));
    rt.create_spec_machine("Liveness").unwrap();
    rt.create_main_machine("Client").unwrap();
    assert!(!rt.deadlock(), "the client is still enabled");
    assert_eq!(rt.monitor("Liveness").unwrap().temperature(), Temperature::Cold);

    drain(&mut rt);
    let monitor = rt.monitor("Liveness").unwrap();
    assert_eq!(monitor.current_state_name(), "Busy");
    assert_eq!(monitor.temperature(), Temperature::Hot);
    assert!(rt.enabled_machines().is_empty());
    assert!(rt.deadlock());
}

#[test]
fn cooled_monitor_is_not_deadlock() {
    let mut rt = runtime(helpers::monitored(true));
    rt.create_spec_machine("Liveness").unwrap();
    rt.create_main_machine("Client").unwrap();
    drain(&mut rt);

    let monitor = rt.monitor("Liveness").unwrap();
    assert_eq!(monitor.current_state_name(), "Idle");
    assert!(monitor.mailbox().is_empty());
    assert!(!rt.deadlock());
    assert_eq!(rt.trace().tagged("<AnnounceLog>").count(), 2);
}

#[test]
fn prop_any_schedule_completes_ping_pong() {
    let mut runner = make_runner(48);
    let strategy = (0i64..6, proptest::collection::vec(any::<usize>(), 0..64));

    runner
        .run(&strategy, |(rounds, picks)| {
            let mut rt = runtime(helpers::ping_pong(rounds));
            rt.create_main_machine("Client").unwrap();
            let mut picks = picks.into_iter();
            let mut steps = 0;
            loop {
                let enabled = rt.enabled_machines();
                if enabled.is_empty() {
                    break;
                }
                let pick = picks.next().unwrap_or(0) % enabled.len();
                rt.run_machine(enabled[pick]).unwrap();
                steps += 1;
                prop_assert!(steps < 1_000, "schedule did not quiesce");
            }

            prop_assert!(rt.fault().is_none());
            prop_assert!(rt.machine(MachineId(0)).unwrap().is_halted());
            let server = rt.machine(MachineId(1)).unwrap();
            prop_assert_eq!(server.status(), MachineStatus::Blocked);
            prop_assert!(server.mailbox().is_empty());
            let rounds_seen = usize::try_from(rounds).unwrap();
            prop_assert_eq!(rt.visible_trace().len(), rounds_seen + 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn prop_clone_then_step_matches_step() {
    let mut runner = make_runner(32);
    let strategy = (1i64..5, 0usize..12);

    runner
        .run(&strategy, |(rounds, prefix)| {
            let mut rt = runtime(helpers::ping_pong(rounds));
            rt.create_main_machine("Client").unwrap();
            for _ in 0..prefix {
                let Some(&id) = rt.enabled_machines().first() else {
                    break;
                };
                rt.run_machine(id).unwrap();
            }
            let Some(&id) = rt.enabled_machines().first() else {
                return Ok(());
            };
            let mut a = rt.clone();
            let mut b = rt.clone();
            a.run_machine(id).unwrap();
            b.run_machine(id).unwrap();
            prop_assert_eq!(a.fingerprint(), b.fingerprint());
            prop_assert_eq!(a.trace().lines(), b.trace().lines());
            Ok(())
        })
        .unwrap();
}
