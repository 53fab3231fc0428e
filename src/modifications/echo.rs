use super::{expect_arity, Modification, ModificationKind};
use crate::atoms::Value;
use crate::carrier::PacketCarrier;
use crate::errors::{ArgumentError, ModificationRuntimeError};
use rand::rngs::StdRng;

pub struct EchoKind;

impl ModificationKind for EchoKind {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn usage(&self) -> &'static str {
        "echo <str>: logs the given string as a trace anchor; carrier unchanged"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity(self.name(), args, 1)?;
        let text = args[0].as_str()?.to_owned();
        Ok(Box::new(Echo { text }))
    }
}

struct Echo {
    text: String,
}

impl Modification for Echo {
    fn apply(
        &self,
        carrier: PacketCarrier,
        _rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        log::info!(target: "divertsuite::echo", "{}", self.text);
        Ok(carrier)
    }

    fn describe(&self) -> String {
        format!("echo({})", self.text)
    }
}
