use super::{expect_arity, Modification, ModificationKind};
use crate::atoms::Value;
use crate::carrier::{CarrierEntry, PacketCarrier};
use crate::errors::{ArgumentError, ModificationRuntimeError};
use rand::rngs::StdRng;
use rand::Rng;

pub struct DuplicateKind;

impl ModificationKind for DuplicateKind {
    fn name(&self) -> &'static str {
        "duplicate"
    }

    fn usage(&self) -> &'static str {
        "duplicate <int index | 'random' | 'all'>: inserts a copy of the chosen entry (or every entry) directly after the original"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity(self.name(), args, 1)?;
        let spec = match &args[0] {
            Value::Int(i) => DuplicateSpec::Index(*i),
            Value::Str(s) if s == "random" => DuplicateSpec::Random,
            Value::Str(s) if s == "all" => DuplicateSpec::All,
            other => {
                return Err(ArgumentError::InvalidValue {
                    name: self.name().to_owned(),
                    value: other.to_string(),
                })
            }
        };
        Ok(Box::new(Duplicate { spec }))
    }
}

enum DuplicateSpec {
    Index(i64),
    Random,
    All,
}

struct Duplicate {
    spec: DuplicateSpec,
}

impl Modification for Duplicate {
    fn apply(
        &self,
        mut carrier: PacketCarrier,
        rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        if carrier.is_empty() {
            return Ok(carrier);
        }
        match &self.spec {
            DuplicateSpec::All => {
                let originals: Vec<CarrierEntry> = carrier.iter().cloned().collect();
                let mut out = PacketCarrier::new();
                for entry in originals {
                    out.append(entry.packet.clone(), entry.delay);
                    out.append(entry.packet, entry.delay);
                }
                Ok(out)
            }
            DuplicateSpec::Random => {
                let n = carrier.len();
                let index = rng.gen_range(0..n);
                duplicate_one(&mut carrier, index);
                Ok(carrier)
            }
            DuplicateSpec::Index(i) => {
                let n = carrier.len() as i64;
                let index = i.rem_euclid(n) as usize;
                duplicate_one(&mut carrier, index);
                Ok(carrier)
            }
        }
    }

    fn describe(&self) -> String {
        match &self.spec {
            DuplicateSpec::Index(i) => format!("duplicate(index={i})"),
            DuplicateSpec::Random => "duplicate(random)".to_owned(),
            DuplicateSpec::All => "duplicate(all)".to_owned(),
        }
    }
}

fn duplicate_one(carrier: &mut PacketCarrier, index: usize) {
    let entry = carrier.get(index).cloned().expect("index validated by caller");
    carrier.insert(index + 1, entry.packet, entry.delay);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use rand::SeedableRng;

    fn carrier_of(n: usize) -> PacketCarrier {
        (0..n)
            .map(|i| CarrierEntry::immediate(Packet::new(vec![i as u8])))
            .collect()
    }

    #[test]
    fn duplicate_index_inserts_directly_after() {
        let c = carrier_of(2);
        let modi = DuplicateKind.parse_args(&[Value::Int(0)]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let out = modi.apply(c, &mut rng).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.get(0).unwrap().packet.as_bytes(), &[0]);
        assert_eq!(out.get(1).unwrap().packet.as_bytes(), &[0]);
        assert_eq!(out.get(2).unwrap().packet.as_bytes(), &[1]);
    }

    #[test]
    fn duplicate_all_doubles_every_entry_in_place() {
        let c = carrier_of(2);
        let modi = DuplicateKind.parse_args(&[Value::Str("all".into())]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let out = modi.apply(c, &mut rng).unwrap();
        assert_eq!(out.len(), 4);
        let bytes: Vec<u8> = out.iter().map(|e| e.packet.as_bytes()[0]).collect();
        assert_eq!(bytes, vec![0, 0, 1, 1]);
    }
}
