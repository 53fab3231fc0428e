//! The modification pipeline: an ordered chain of concrete modifications
//! bound to one direction of a test (component D).

use crate::carrier::PacketCarrier;
use crate::errors::ModificationRuntimeError;
use crate::modifications::Modification;
use rand::rngs::StdRng;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// One step of the pipeline: a bound modification plus whether its
/// failures are fatal to the test or merely logged.
pub struct PipelineStep {
    pub modification: Box<dyn Modification>,
    pub optional: bool,
}

/// An ordered list of modifications bound to concrete arguments, tagged
/// with the direction of traffic it applies to (§3).
pub struct ModificationPipeline {
    direction: Direction,
    steps: Vec<PipelineStep>,
}

impl ModificationPipeline {
    pub fn new(direction: Direction, steps: Vec<PipelineStep>) -> Self {
        ModificationPipeline { direction, steps }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `apply(C) = fold_left(apply_i, C, modifications)`. No early-exit on
    /// an empty carrier: some modifications (e.g. Echo) observe it.
    /// An `optional` step that errors is logged and downgraded to a
    /// passthrough rather than aborting the fold (§4.D, §7).
    pub fn apply(
        &self,
        mut carrier: PacketCarrier,
        rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        for step in &self.steps {
            let before = carrier.copy();
            match step.modification.apply(carrier, rng) {
                Ok(next) => carrier = next,
                Err(err) if step.optional => {
                    log::warn!(
                        "optional modification {} failed, passing carrier through unchanged: {err}",
                        step.modification.describe()
                    );
                    carrier = before;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(carrier)
    }
}
