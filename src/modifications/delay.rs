use super::{expect_arity, Modification, ModificationKind};
use crate::atoms::Value;
use crate::carrier::PacketCarrier;
use crate::errors::{ArgumentError, ModificationRuntimeError};
use rand::rngs::StdRng;
use std::time::Duration;

pub struct DelayKind;

impl ModificationKind for DelayKind {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn usage(&self) -> &'static str {
        "delay <int ms> <'all' | comma-separated indices>: sets the post-delay of the selected entries"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity(self.name(), args, 2)?;
        let ms = args[0].as_int()?;
        if ms < 0 {
            return Err(ArgumentError::InvalidValue {
                name: self.name().to_owned(),
                value: ms.to_string(),
            });
        }
        let spec_str = args[1].as_str()?;
        let spec = if spec_str == "all" {
            DelaySelection::All
        } else {
            let indices = spec_str
                .split(',')
                .map(|tok| tok.trim().parse::<i64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| ArgumentError::InvalidValue {
                    name: self.name().to_owned(),
                    value: spec_str.to_owned(),
                })?;
            DelaySelection::Indices(indices)
        };
        Ok(Box::new(Delay {
            ms: ms as u64,
            spec,
        }))
    }
}

enum DelaySelection {
    All,
    Indices(Vec<i64>),
}

struct Delay {
    ms: u64,
    spec: DelaySelection,
}

impl Modification for Delay {
    fn apply(
        &self,
        mut carrier: PacketCarrier,
        _rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        if carrier.is_empty() {
            return Ok(carrier);
        }
        let duration = Duration::from_millis(self.ms);
        match &self.spec {
            DelaySelection::All => {
                for i in 0..carrier.len() {
                    set_delay(&mut carrier, i, duration);
                }
            }
            DelaySelection::Indices(indices) => {
                let n = carrier.len() as i64;
                for &i in indices {
                    let idx = i.rem_euclid(n) as usize;
                    set_delay(&mut carrier, idx, duration);
                }
            }
        }
        Ok(carrier)
    }

    fn describe(&self) -> String {
        format!("delay(ms={})", self.ms)
    }
}

fn set_delay(carrier: &mut PacketCarrier, index: usize, duration: Duration) {
    if let Some(entry) = carrier.remove(index) {
        carrier.insert(index, entry.packet, duration);
    }
}
