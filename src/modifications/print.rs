use super::{expect_arity, Modification, ModificationKind};
use crate::atoms::Value;
use crate::carrier::PacketCarrier;
use crate::errors::{ArgumentError, ModificationRuntimeError};
use rand::rngs::StdRng;

pub struct PrintKind;

impl ModificationKind for PrintKind {
    fn name(&self) -> &'static str {
        "print"
    }

    fn usage(&self) -> &'static str {
        "print: logs a human dump of every packet currently in the carrier; carrier unchanged"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        expect_arity(self.name(), args, 0)?;
        Ok(Box::new(Print))
    }
}

struct Print;

impl Modification for Print {
    fn apply(
        &self,
        carrier: PacketCarrier,
        _rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        for (i, entry) in carrier.iter().enumerate() {
            log::debug!(target: "divertsuite::print", "[{i}] {:?} (+{:?})", entry.packet, entry.delay);
        }
        Ok(carrier)
    }

    fn describe(&self) -> String {
        "print()".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use rand::SeedableRng;

    #[test]
    fn print_does_not_alter_the_carrier() {
        let modi = PrintKind.parse_args(&[]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let carrier = PacketCarrier::single(Packet::new(vec![9]));
        let out = modi.apply(carrier.clone(), &mut rng).unwrap();
        assert_eq!(out, carrier);
    }
}
