//! Typed configuration loading (component I). Deserialises the suite's
//! JSON description (§6) into the model consumed by the expander (E) and
//! the diversion controller (F), rejecting unknown fields so config typos
//! fail `checkconfig` instead of silently no-opping.

use crate::atoms::{Atom, Value};
use crate::errors::{ArgumentError, ConfigError, SuiteError};
use crate::modifications::{ModificationKind, Registry};
use serde::Deserialize;
use std::path::Path;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub cmd: String,
    pub nfrules: Vec<RawRule>,
    #[serde(default)]
    pub input: Vec<RawModDescriptor>,
    #[serde(default)]
    pub output: Vec<RawModDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRule {
    #[serde(default = "default_true")]
    pub output_chain: bool,
    #[serde(default = "default_true")]
    pub input_chain: bool,
    pub proto: Option<String>,
    pub host: Option<String>,
    pub host6: Option<String>,
    pub port: Option<String>,
    #[serde(default = "default_true")]
    pub ipv4: bool,
    #[serde(default = "default_true")]
    pub ipv6: bool,
    pub qnum: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawModDescriptor {
    pub mod_name: String,
    #[serde(default)]
    pub mod_opts: serde_json::Value,
    #[serde(default)]
    pub optional: bool,
}

/// Reads and parses a configuration file, wrapping I/O and parse failures
/// in [`ConfigError`].
pub fn load_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_str(&text)
}

pub fn parse_str(text: &str) -> Result<RawConfig, ConfigError> {
    serde_json::from_str(text).map_err(ConfigError::Parse)
}

/// A fully validated, resolved modification descriptor: a name that
/// resolves in the registry, plus one argument atom per position.
pub struct ResolvedModDescriptor {
    pub mod_name: String,
    pub atoms: Vec<Atom>,
    pub optional: bool,
}

/// Runs every `checkconfig` validation named in §4.E/§4.I and, on
/// success, returns the resolved descriptors for both pipelines.
pub fn validate(
    config: &RawConfig,
    registry: &Registry,
) -> Result<(Vec<ResolvedModDescriptor>, Vec<ResolvedModDescriptor>), SuiteError> {
    validate_command_template(&config.cmd)?;
    validate_nfrules(&config.nfrules)?;
    let input = resolve_descriptors(&config.input, registry)?;
    let output = resolve_descriptors(&config.output, registry)?;
    Ok((input, output))
}

fn resolve_descriptors(
    raw: &[RawModDescriptor],
    registry: &Registry,
) -> Result<Vec<ResolvedModDescriptor>, SuiteError> {
    raw.iter()
        .map(|d| {
            let kind = registry.lookup(&d.mod_name)?;
            let atoms = atom_list_from_json(&d.mod_opts)?;
            validate_descriptor_args(&atoms, kind)?;
            Ok(ResolvedModDescriptor {
                mod_name: d.mod_name.clone(),
                atoms,
                optional: d.optional,
            })
        })
        .collect()
}

/// Binds every concrete argument tuple a descriptor's atoms can produce
/// against the modification kind's `parse_args`, so a bad `mod_opts` shape
/// or value raises `ArgumentError` here — pre-run, suite-fatal (§7) —
/// rather than the first time the expander happens to materialise that
/// particular tuple mid-suite.
fn validate_descriptor_args(atoms: &[Atom], kind: &dyn ModificationKind) -> Result<(), ArgumentError> {
    if atoms.is_empty() {
        return kind.parse_args(&[]).map(|_| ());
    }
    let cardinalities: Vec<usize> = atoms.iter().map(Atom::cardinality).collect();
    if cardinalities.iter().any(|&c| c == 0) {
        // No concrete tuple exists; the expander will produce zero tests
        // from this descriptor too, so there is nothing to bind yet.
        return Ok(());
    }
    let total: usize = cardinalities.iter().product();
    for idx in 0..total {
        let mut stride = 1usize;
        let mut tuple = vec![Value::None; atoms.len()];
        for (i, atom) in atoms.iter().enumerate().rev() {
            let card = cardinalities[i];
            let values = atom.values();
            let local = (idx / stride) % card;
            tuple[i] = values[local].clone();
            stride *= card;
        }
        kind.parse_args(&tuple)?;
    }
    Ok(())
}

/// `mod_opts` disambiguation: a JSON array supplies one argument per
/// element; any other JSON value is a single one-argument list; an
/// absent/`null` value supplies zero arguments (nullary modifications).
pub fn atom_list_from_json(value: &serde_json::Value) -> Result<Vec<Atom>, crate::errors::ArgumentError> {
    match value {
        serde_json::Value::Array(items) => items.iter().map(atom_from_json).collect(),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Ok(vec![atom_from_json(other)?]),
    }
}

fn atom_from_json(value: &serde_json::Value) -> Result<Atom, crate::errors::ArgumentError> {
    use crate::errors::ArgumentError;
    match value {
        serde_json::Value::String(s) => {
            let tokens: Vec<&str> = s.split_whitespace().collect();
            Atom::parse(&tokens)
        }
        serde_json::Value::Number(n) => {
            let i = n.as_i64().ok_or_else(|| ArgumentError::NotAnInt {
                token: n.to_string(),
            })?;
            Ok(Atom::Scalar(crate::atoms::Value::Int(i)))
        }
        other => Err(ArgumentError::InvalidValue {
            name: "mod_opts".to_owned(),
            value: other.to_string(),
        }),
    }
}

fn validate_command_template(cmd: &str) -> Result<(), ConfigError> {
    if cmd.trim().is_empty() {
        return Err(ConfigError::EmptyCommand);
    }
    let mut chars = cmd.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '{' {
            continue;
        }
        let close = cmd[i..].find('}').map(|o| i + o);
        match close {
            Some(close) => {
                let placeholder = &cmd[i + 1..close];
                if placeholder != "i" && placeholder != "j" {
                    return Err(ConfigError::BadPlaceholder {
                        placeholder: placeholder.to_owned(),
                    });
                }
            }
            None => {
                return Err(ConfigError::BadPlaceholder {
                    placeholder: cmd[i..].to_owned(),
                })
            }
        }
    }
    Ok(())
}

fn validate_nfrules(rules: &[RawRule]) -> Result<(), ConfigError> {
    if rules.is_empty() {
        return Err(ConfigError::MissingQueueNumber);
    }
    let mut output_seen = std::collections::HashSet::new();
    let mut input_seen = std::collections::HashSet::new();
    for rule in rules {
        if rule.qnum % 2 != 0 {
            return Err(ConfigError::QueueNumberNotEven { qnum: rule.qnum });
        }
        if rule.output_chain {
            let qnum = rule.qnum as u16;
            if !output_seen.insert(qnum) {
                return Err(ConfigError::DuplicateQueueNumber {
                    qnum,
                    direction: "output",
                });
            }
        }
        if rule.input_chain {
            let qnum = (rule.qnum + 1) as u16;
            if !input_seen.insert(qnum) {
                return Err(ConfigError::DuplicateQueueNumber {
                    qnum,
                    direction: "input",
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let text = r#"{
            "cmd": "/bin/true",
            "nfrules": [{"qnum": 0, "ipv6": true, "ipv4": false}],
            "output": [{"mod_name": "echo", "mod_opts": "x"}]
        }"#;
        let config = parse_str(text).unwrap();
        assert_eq!(config.cmd, "/bin/true");
        assert_eq!(config.nfrules.len(), 1);
        assert!(config.nfrules[0].output_chain);
        assert!(config.input.is_empty());
    }

    #[test]
    fn rejects_unknown_top_level_field() {
        let text = r#"{"cmd": "/bin/true", "nfrules": [{"qnum": 0}], "bogus": 1}"#;
        assert!(parse_str(text).is_err());
    }

    #[test]
    fn rejects_odd_queue_number() {
        let rules = vec![RawRule {
            output_chain: true,
            input_chain: false,
            proto: None,
            host: None,
            host6: None,
            port: None,
            ipv4: true,
            ipv6: true,
            qnum: 1,
        }];
        assert!(matches!(
            validate_nfrules(&rules),
            Err(ConfigError::QueueNumberNotEven { qnum: 1 })
        ));
    }

    #[test]
    fn rejects_duplicate_queue_number_within_direction() {
        let rule = |qnum| RawRule {
            output_chain: true,
            input_chain: false,
            proto: None,
            host: None,
            host6: None,
            port: None,
            ipv4: true,
            ipv6: true,
            qnum,
        };
        let rules = vec![rule(0), rule(0)];
        assert!(matches!(
            validate_nfrules(&rules),
            Err(ConfigError::DuplicateQueueNumber { .. })
        ));
    }

    #[test]
    fn rejects_bad_placeholder_in_command_template() {
        assert!(validate_command_template("echo {k}").is_err());
        assert!(validate_command_template("echo {i} {j}").is_ok());
    }

    #[test]
    fn mod_opts_array_yields_one_atom_per_element() {
        let value: serde_json::Value = serde_json::json!(["range 50 151 50", 3]);
        let atoms = atom_list_from_json(&value).unwrap();
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0].cardinality(), 3);
        assert_eq!(atoms[1], Atom::Scalar(crate::atoms::Value::Int(3)));
    }

    #[test]
    fn mod_opts_scalar_yields_single_atom_list() {
        let value: serde_json::Value = serde_json::json!("x");
        let atoms = atom_list_from_json(&value).unwrap();
        assert_eq!(atoms.len(), 1);
    }

    #[test]
    fn validate_rejects_bad_mod_opts_before_any_test_runs() {
        let registry = Registry::with_builtins();
        let text = r#"{
            "cmd": "/bin/true",
            "nfrules": [{"qnum": 0}],
            "output": [{"mod_name": "segment", "mod_opts": "str hello"}]
        }"#;
        let config = parse_str(text).unwrap();
        let err = validate(&config, &registry).unwrap_err();
        assert!(matches!(err, SuiteError::Argument(_)));
    }

    #[test]
    fn validate_rejects_every_tuple_a_ranged_descriptor_can_produce() {
        let registry = Registry::with_builtins();
        // `favor-last` and `favor-first` both require `size > OVERLAP_BYTES`;
        // the range includes sizes that fail only for some tuples, so this
        // only fails if every tuple is actually bound, not just the first.
        let text = r#"{
            "cmd": "/bin/true",
            "nfrules": [{"qnum": 0}],
            "output": [{"mod_name": "overlap", "mod_opts": ["favor-last", "range 8 32 8"]}]
        }"#;
        let config = parse_str(text).unwrap();
        let err = validate(&config, &registry).unwrap_err();
        assert!(matches!(err, SuiteError::Argument(_)));
    }

    #[test]
    fn validate_accepts_well_formed_mod_opts() {
        let registry = Registry::with_builtins();
        let text = r#"{
            "cmd": "/bin/true",
            "nfrules": [{"qnum": 0}],
            "output": [{"mod_name": "segment", "mod_opts": "int 50"}]
        }"#;
        let config = parse_str(text).unwrap();
        assert!(validate(&config, &registry).is_ok());
    }
}
