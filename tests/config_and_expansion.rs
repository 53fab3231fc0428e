//! End-to-end scenarios from the configuration surface down to a bound
//! pipeline, without touching the kernel (no diversion rule is installed,
//! no queue is opened): S1 and S3, plus property 1 (expander cardinality)
//! against a config loaded from JSON text rather than hand-built atoms.

use divertsuite::carrier::PacketCarrier;
use divertsuite::config;
use divertsuite::modifications::Registry;
use divertsuite::{CarrierEntry, Packet};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn s1_single_echo_output_rule_yields_one_passthrough_test() {
    let text = r#"{
        "cmd": "/bin/true",
        "nfrules": [{"qnum": 0, "ipv4": false, "ipv6": true}],
        "output": [{"mod_name": "echo", "mod_opts": "x"}]
    }"#;
    let registry = Registry::with_builtins();
    let raw = config::parse_str(text).unwrap();
    let (input, output) = config::validate(&raw, &registry).unwrap();
    let tests = divertsuite::expander::expand(&input, &output).unwrap();
    assert_eq!(tests.len(), 1);

    let (input_pipeline, output_pipeline) =
        divertsuite::expander::build_pipelines(&registry, &input, &output, &tests[0]).unwrap();
    assert!(input_pipeline.is_empty());
    assert_eq!(output_pipeline.len(), 1);

    let mut rng = StdRng::seed_from_u64(0);
    let carrier = PacketCarrier::single(Packet::new(vec![1, 2, 3, 4]));
    let out = output_pipeline.apply(carrier.clone(), &mut rng).unwrap();
    assert_eq!(out, carrier, "echo must not mutate the carrier");
}

#[test]
fn s3_drop_one_then_duplicate_on_a_two_entry_carrier() {
    let text = r#"{
        "cmd": "/bin/true",
        "nfrules": [{"qnum": 2, "ipv4": true, "ipv6": false}],
        "output": [
            {"mod_name": "drop_one", "mod_opts": 0},
            {"mod_name": "duplicate", "mod_opts": 0}
        ]
    }"#;
    let registry = Registry::with_builtins();
    let raw = config::parse_str(text).unwrap();
    let (input, output) = config::validate(&raw, &registry).unwrap();
    let tests = divertsuite::expander::expand(&input, &output).unwrap();
    assert_eq!(tests.len(), 1);

    let (_, output_pipeline) =
        divertsuite::expander::build_pipelines(&registry, &input, &output, &tests[0]).unwrap();

    let carrier: PacketCarrier = vec![
        CarrierEntry::immediate(Packet::new(vec![0])),
        CarrierEntry::immediate(Packet::new(vec![1])),
    ]
    .into_iter()
    .collect();

    let mut rng = StdRng::seed_from_u64(0);
    let out = output_pipeline.apply(carrier, &mut rng).unwrap();
    assert_eq!(out.len(), 2);
    let tags: Vec<u8> = out.iter().map(|e| e.packet.as_bytes()[0]).collect();
    assert_eq!(tags, vec![1, 1]);
}

#[test]
fn property_1_expander_cardinality_matches_atom_product() {
    let text = r#"{
        "cmd": "/bin/true",
        "nfrules": [{"qnum": 4, "ipv4": true, "ipv6": true}],
        "input": [{"mod_name": "delay", "mod_opts": ["seq_int 1 2 3", "all"]}],
        "output": [{"mod_name": "fragment6", "mod_opts": "range 50 151 50"}]
    }"#;
    let registry = Registry::with_builtins();
    let raw = config::parse_str(text).unwrap();
    let (input, output) = config::validate(&raw, &registry).unwrap();
    let tests = divertsuite::expander::expand(&input, &output).unwrap();
    // delay's first arg has cardinality 3 (seq_int), second arg 1 ("all"
    // is a single scalar string); fragment6's range(50,151,50) has
    // cardinality 3. Total = 3 * 1 * 3 = 9.
    assert_eq!(tests.len(), 9);
}

#[test]
fn checkconfig_rejects_a_config_with_an_unknown_modification() {
    let text = r#"{
        "cmd": "/bin/true",
        "nfrules": [{"qnum": 0}],
        "output": [{"mod_name": "does_not_exist", "mod_opts": null}]
    }"#;
    let registry = Registry::with_builtins();
    let raw = config::parse_str(text).unwrap();
    assert!(config::validate(&raw, &registry).is_err());
}
