use super::{expect_arity, Modification, ModificationKind};
use crate::atoms::Value;
use crate::carrier::PacketCarrier;
use crate::errors::{ArgumentError, ModificationRuntimeError};
use rand::rngs::StdRng;
use rand::Rng;

pub struct DropOneKind;

impl ModificationKind for DropOneKind {
    fn name(&self) -> &'static str {
        "drop_one"
    }

    fn usage(&self) -> &'static str {
        "drop_one <int index>: removes the entry at index (mod carrier length); no-op on an empty carrier"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity(self.name(), args, 1)?;
        let index = args[0].as_int()?;
        Ok(Box::new(DropOne { index }))
    }
}

struct DropOne {
    index: i64,
}

impl Modification for DropOne {
    fn apply(
        &self,
        mut carrier: PacketCarrier,
        _rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        if carrier.is_empty() {
            return Ok(carrier);
        }
        let n = carrier.len() as i64;
        let index = self.index.rem_euclid(n) as usize;
        carrier.remove(index);
        Ok(carrier)
    }

    fn describe(&self) -> String {
        format!("drop_one(index={})", self.index)
    }
}

pub struct DropProbaKind;

impl ModificationKind for DropProbaKind {
    fn name(&self) -> &'static str {
        "drop_proba"
    }

    fn usage(&self) -> &'static str {
        "drop_proba <p>: each entry independently dropped with probability p in [0, 1], relative order of survivors preserved"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity(self.name(), args, 1)?;
        let p = parse_probability(&args[0])?;
        Ok(Box::new(DropProba { p }))
    }
}

fn parse_probability(value: &Value) -> Result<f64, ArgumentError> {
    let p = match value {
        Value::Int(0) => 0.0,
        Value::Int(1) => 1.0,
        Value::Int(n) => {
            return Err(ArgumentError::InvalidValue {
                name: "drop_proba".into(),
                value: n.to_string(),
            })
        }
        Value::Str(s) => s.parse::<f64>().map_err(|_| ArgumentError::InvalidValue {
            name: "drop_proba".into(),
            value: s.clone(),
        })?,
        Value::None => {
            return Err(ArgumentError::InvalidValue {
                name: "drop_proba".into(),
                value: "none".into(),
            })
        }
    };
    if !(0.0..=1.0).contains(&p) {
        return Err(ArgumentError::InvalidValue {
            name: "drop_proba".into(),
            value: p.to_string(),
        });
    }
    Ok(p)
}

struct DropProba {
    p: f64,
}

impl Modification for DropProba {
    fn apply(
        &self,
        carrier: PacketCarrier,
        rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        if self.p <= 0.0 {
            return Ok(carrier);
        }
        if self.p >= 1.0 {
            return Ok(PacketCarrier::new());
        }
        let survivors = carrier
            .into_iter()
            .filter(|_| !rng.gen_bool(self.p))
            .collect();
        Ok(survivors)
    }

    fn describe(&self) -> String {
        format!("drop_proba(p={})", self.p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use rand::SeedableRng;

    fn carrier_of(n: usize) -> PacketCarrier {
        (0..n)
            .map(|i| crate::carrier::CarrierEntry::immediate(Packet::new(vec![i as u8])))
            .collect()
    }

    #[test]
    fn drop_proba_zero_is_identity() {
        let c = carrier_of(5);
        let modi = DropProbaKind.parse_args(&[Value::Int(0)]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let out = modi.apply(c.clone(), &mut rng).unwrap();
        assert_eq!(out, c);
    }

    #[test]
    fn drop_proba_one_empties_carrier() {
        let c = carrier_of(5);
        let modi = DropProbaKind.parse_args(&[Value::Int(1)]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let out = modi.apply(c, &mut rng).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn drop_one_wraps_index_by_length() {
        let c = carrier_of(3);
        let modi = DropOneKind.parse_args(&[Value::Int(4)]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let out = modi.apply(c, &mut rng).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.get(0).unwrap().packet.as_bytes(), &[0]);
        assert_eq!(out.get(1).unwrap().packet.as_bytes(), &[2]);
    }

    #[test]
    fn drop_one_on_empty_carrier_is_noop() {
        let modi = DropOneKind.parse_args(&[Value::Int(0)]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let out = modi.apply(PacketCarrier::new(), &mut rng).unwrap();
        assert!(out.is_empty());
    }
}
