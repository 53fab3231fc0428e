//! Properties 8 and 9 (teardown, idempotent sweep) against the real
//! `iptables`/`ip6tables` binaries. Requires root and is skipped unless
//! the `integration-tests` feature is enabled, since it mutates the
//! host's `filter` table.

#![cfg(feature = "integration-tests")]

use divertsuite::config::RawRule;
use divertsuite::diversion::DiversionController;

fn sample_rule(qnum: i64) -> RawRule {
    RawRule {
        output_chain: true,
        input_chain: true,
        proto: Some("udp".to_owned()),
        host: Some("127.0.0.1".to_owned()),
        host6: None,
        port: Some("9".to_owned()),
        ipv4: true,
        ipv6: false,
        qnum,
    }
}

fn breadcrumb_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("divertsuite-test-breadcrumb-{}", std::process::id()))
}

#[test]
fn property_8_teardown_leaves_no_tagged_rule_behind() {
    let path = breadcrumb_path();
    let mut controller = DiversionController::new(path.clone()).unwrap();
    controller.install(&[sample_rule(100)], 0).unwrap();
    controller.uninstall().unwrap();

    let sweeper = DiversionController::new(path).unwrap();
    // A second sweep after a clean uninstall should find nothing left to
    // remove; sweep_stale_rules must still succeed (not error on an
    // already-clean table).
    sweeper.sweep_stale_rules().unwrap();
}

#[test]
fn property_9_idempotent_sweep_is_a_noop_the_second_time() {
    let path = breadcrumb_path();
    let mut controller = DiversionController::new(path.clone()).unwrap();
    controller.install(&[sample_rule(102)], 1).unwrap();
    // Simulate a crash: skip uninstall, go straight to a fresh start's sweep.
    drop(controller);

    let first = DiversionController::new(path.clone()).unwrap();
    first.sweep_stale_rules().unwrap();

    let second = DiversionController::new(path).unwrap();
    second.sweep_stale_rules().unwrap();
}
