//! Kernel-diversion controller (component F). Installs and removes
//! `NFQUEUE` selectors via `iptables`/`ip6tables`, tagging every rule it
//! installs with a comment carrying this tool's signature and the test
//! index so a stale-rule sweep can recognise and remove only its own
//! leftovers after a crash.

use crate::config::RawRule;
use crate::errors::SetupError;
use std::path::{Path, PathBuf};

const SIGNATURE: &str = "divertsuite";
const TABLE: &str = "filter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

/// A single installed iptables/ip6tables rule, remembered so teardown can
/// remove exactly what was installed, in reverse order.
struct InstalledRule {
    family: Family,
    chain: &'static str,
    spec: String,
}

/// Owns the process-wide diversion state for the currently active test.
pub struct DiversionController {
    ipt4: iptables::IPTables,
    ipt6: iptables::IPTables,
    breadcrumb_path: PathBuf,
    installed: Vec<InstalledRule>,
}

impl DiversionController {
    pub fn new(breadcrumb_path: impl Into<PathBuf>) -> Result<Self, SetupError> {
        let ipt4 = iptables::new(false).map_err(|e| SetupError::RuleInstall(e.to_string()))?;
        let ipt6 = iptables::new(true).map_err(|e| SetupError::RuleInstall(e.to_string()))?;
        Ok(DiversionController {
            ipt4,
            ipt6,
            breadcrumb_path: breadcrumb_path.into(),
            installed: Vec::new(),
        })
    }

    /// Removes any rule tagged with this tool's signature left behind by a
    /// crashed prior run (§4.F, §5 "Failure release", property 9).
    pub fn sweep_stale_rules(&self) -> Result<(), SetupError> {
        for (ipt, chain) in [(&self.ipt4, "OUTPUT"), (&self.ipt4, "INPUT")] {
            sweep_chain(ipt, chain).map_err(|e| SetupError::RuleRemove(e.to_string()))?;
        }
        for (ipt, chain) in [(&self.ipt6, "OUTPUT"), (&self.ipt6, "INPUT")] {
            sweep_chain(ipt, chain).map_err(|e| SetupError::RuleRemove(e.to_string()))?;
        }
        if self.breadcrumb_path.exists() {
            std::fs::remove_file(&self.breadcrumb_path).ok();
        }
        Ok(())
    }

    /// Installs every selector implied by `rules` for `test_index`,
    /// recording each in install order so teardown can reverse it, and
    /// persists the breadcrumb file before returning.
    pub fn install(&mut self, rules: &[RawRule], test_index: usize) -> Result<(), SetupError> {
        let comment = format!("{SIGNATURE}:test{test_index}");
        let mut newly_installed = Vec::new();
        for rule in rules {
            for installed in plan_rules(rule, &comment) {
                install_one(self.ipt_for(installed.family), &installed)
                    .map_err(|e| SetupError::RuleInstall(e.to_string()))?;
                newly_installed.push(installed);
            }
        }
        self.installed.extend(newly_installed);
        self.write_breadcrumb().map_err(|e| SetupError::RuleInstall(e.to_string()))?;
        Ok(())
    }

    /// Removes exactly the rules this instance installed, in reverse
    /// install order, regardless of the test's outcome (§4.F, §5).
    pub fn uninstall(&mut self) -> Result<(), SetupError> {
        let mut first_error = None;
        while let Some(rule) = self.installed.pop() {
            if let Err(e) = remove_one(self.ipt_for(rule.family), &rule) {
                first_error.get_or_insert_with(|| SetupError::RuleRemove(e.to_string()));
            }
        }
        let _ = std::fs::remove_file(&self.breadcrumb_path);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ipt_for(&self, family: Family) -> &iptables::IPTables {
        match family {
            Family::V4 => &self.ipt4,
            Family::V6 => &self.ipt6,
        }
    }

    fn write_breadcrumb(&self) -> std::io::Result<()> {
        let lines: Vec<String> = self
            .installed
            .iter()
            .map(|r| format!("{:?}\t{}\t{}", r.family, r.chain, r.spec))
            .collect();
        std::fs::write(&self.breadcrumb_path, lines.join("\n"))
    }
}

fn plan_rules(rule: &RawRule, comment: &str) -> Vec<InstalledRule> {
    let mut out = Vec::new();
    if rule.ipv4 {
        if rule.output_chain {
            out.push(InstalledRule {
                family: Family::V4,
                chain: "OUTPUT",
                spec: rule_spec(rule, rule.qnum as u16, "-d", rule.host.as_deref(), comment),
            });
        }
        if rule.input_chain {
            out.push(InstalledRule {
                family: Family::V4,
                chain: "INPUT",
                spec: rule_spec(rule, rule.qnum as u16 + 1, "-s", rule.host.as_deref(), comment),
            });
        }
    }
    if rule.ipv6 {
        if rule.output_chain {
            out.push(InstalledRule {
                family: Family::V6,
                chain: "OUTPUT",
                spec: rule_spec(rule, rule.qnum as u16, "-d", rule.host6.as_deref(), comment),
            });
        }
        if rule.input_chain {
            out.push(InstalledRule {
                family: Family::V6,
                chain: "INPUT",
                spec: rule_spec(rule, rule.qnum as u16 + 1, "-s", rule.host6.as_deref(), comment),
            });
        }
    }
    out
}

fn rule_spec(rule: &RawRule, qnum: u16, host_flag: &str, host: Option<&str>, comment: &str) -> String {
    let mut spec = String::new();
    if let Some(proto) = &rule.proto {
        spec.push_str(&format!("-p {proto} "));
        if let Some(port) = &rule.port {
            spec.push_str(&format!("--dport {port} "));
        }
    }
    if let Some(host) = host {
        spec.push_str(&format!("{host_flag} {host} "));
    }
    spec.push_str(&format!(
        "-m comment --comment \"{comment}\" -j NFQUEUE --queue-num {qnum}"
    ));
    spec
}

fn install_one(ipt: &iptables::IPTables, rule: &InstalledRule) -> Result<(), Box<dyn std::error::Error>> {
    ipt.append(TABLE, rule.chain, &rule.spec)?;
    Ok(())
}

fn remove_one(ipt: &iptables::IPTables, rule: &InstalledRule) -> Result<(), Box<dyn std::error::Error>> {
    ipt.delete(TABLE, rule.chain, &rule.spec)?;
    Ok(())
}

fn sweep_chain(ipt: &iptables::IPTables, chain: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rules = ipt.list(TABLE, chain)?;
    for line in rules {
        if !line.contains(SIGNATURE) {
            continue;
        }
        let spec = strip_append_prefix(&line, chain);
        if ipt.exists(TABLE, chain, &spec).unwrap_or(false) {
            ipt.delete(TABLE, chain, &spec)?;
        }
    }
    Ok(())
}

/// `iptables -S` output lines look like `-A CHAIN <rule spec>`; strip that
/// prefix so the remainder can be re-used as a `delete` rule spec.
fn strip_append_prefix(line: &str, chain: &str) -> String {
    let prefix = format!("-A {chain} ");
    line.strip_prefix(&prefix).unwrap_or(line).to_owned()
}

pub fn default_breadcrumb_path() -> PathBuf {
    Path::new("/var/run/divertsuite").join("breadcrumb")
}
