use super::{expect_arity, Modification, ModificationKind};
use crate::atoms::Value;
use crate::carrier::PacketCarrier;
use crate::errors::{ArgumentError, ModificationRuntimeError};
use rand::rngs::StdRng;

pub struct SelectKind;

impl ModificationKind for SelectKind {
    fn name(&self) -> &'static str {
        "select"
    }

    fn usage(&self) -> &'static str {
        "select <comma-separated indices>: keeps only the listed entries, in the order listed (filters and/or reorders)"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity(self.name(), args, 1)?;
        let s = args[0].as_str()?;
        let indices = s
            .split(',')
            .map(|tok| tok.trim().parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ArgumentError::InvalidValue {
                name: self.name().to_owned(),
                value: s.to_owned(),
            })?;
        Ok(Box::new(Select { indices }))
    }
}

struct Select {
    indices: Vec<i64>,
}

impl Modification for Select {
    fn apply(
        &self,
        carrier: PacketCarrier,
        _rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        if carrier.is_empty() {
            return Ok(carrier);
        }
        let n = carrier.len() as i64;
        let entries: Vec<_> = carrier.iter().cloned().collect();
        let selected = self
            .indices
            .iter()
            .map(|&i| entries[i.rem_euclid(n) as usize].clone())
            .collect();
        Ok(selected)
    }

    fn describe(&self) -> String {
        format!("select({:?})", self.indices)
    }
}
