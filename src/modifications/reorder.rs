use super::{expect_arity, Modification, ModificationKind};
use crate::atoms::Value;
use crate::carrier::PacketCarrier;
use crate::errors::{ArgumentError, ModificationRuntimeError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

pub struct ReorderKind;

impl ModificationKind for ReorderKind {
    fn name(&self) -> &'static str {
        "reorder"
    }

    fn usage(&self) -> &'static str {
        "reorder <'random' | comma-separated permutation of 0..n>: reorders the carrier"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity(self.name(), args, 1)?;
        let spec = match &args[0] {
            Value::Str(s) if s == "random" => ReorderSpec::Random,
            Value::Str(s) => {
                let permutation = parse_permutation(s).ok_or_else(|| ArgumentError::InvalidValue {
                    name: self.name().to_owned(),
                    value: s.clone(),
                })?;
                ReorderSpec::Permutation(permutation)
            }
            other => {
                return Err(ArgumentError::InvalidValue {
                    name: self.name().to_owned(),
                    value: other.to_string(),
                })
            }
        };
        Ok(Box::new(Reorder { spec }))
    }
}

fn parse_permutation(s: &str) -> Option<Vec<usize>> {
    s.split(',')
        .map(|tok| tok.trim().parse::<usize>().ok())
        .collect()
}

enum ReorderSpec {
    Random,
    Permutation(Vec<usize>),
}

struct Reorder {
    spec: ReorderSpec,
}

impl Modification for Reorder {
    fn apply(
        &self,
        carrier: PacketCarrier,
        rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        let mut entries: Vec<_> = carrier.iter().cloned().collect();
        match &self.spec {
            ReorderSpec::Random => {
                entries.shuffle(rng);
                Ok(entries.into_iter().collect())
            }
            ReorderSpec::Permutation(perm) => {
                if perm.len() != entries.len() || !is_permutation_of_range(perm) {
                    return Err(ModificationRuntimeError {
                        modification: self.describe(),
                        reason: format!(
                            "permutation of length {} is not valid for a carrier of length {}",
                            perm.len(),
                            entries.len()
                        ),
                    });
                }
                let reordered = perm.iter().map(|&i| entries[i].clone()).collect();
                Ok(reordered)
            }
        }
    }

    fn describe(&self) -> String {
        match &self.spec {
            ReorderSpec::Random => "reorder(random)".to_owned(),
            ReorderSpec::Permutation(p) => format!("reorder({p:?})"),
        }
    }
}

fn is_permutation_of_range(perm: &[usize]) -> bool {
    let mut seen = vec![false; perm.len()];
    for &i in perm {
        match seen.get_mut(i) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::CarrierEntry;
    use crate::packet::Packet;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn carrier_of(n: usize) -> PacketCarrier {
        (0..n)
            .map(|i| CarrierEntry::immediate(Packet::new(vec![i as u8])))
            .collect()
    }

    #[test]
    fn explicit_permutation_reorders_accordingly() {
        let c = carrier_of(3);
        let modi = ReorderKind
            .parse_args(&[Value::Str("2,0,1".into())])
            .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let out = modi.apply(c, &mut rng).unwrap();
        let bytes: Vec<u8> = out.iter().map(|e| e.packet.as_bytes()[0]).collect();
        assert_eq!(bytes, vec![2, 0, 1]);
    }

    #[test]
    fn random_reorder_preserves_multiset() {
        let c = carrier_of(5);
        let modi = ReorderKind.parse_args(&[Value::Str("random".into())]).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let out = modi.apply(c.clone(), &mut rng).unwrap();
        let before: HashSet<u8> = c.iter().map(|e| e.packet.as_bytes()[0]).collect();
        let after: HashSet<u8> = out.iter().map(|e| e.packet.as_bytes()[0]).collect();
        assert_eq!(before, after);
        assert_eq!(out.len(), c.len());
    }
}
