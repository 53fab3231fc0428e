//! Test-plan expander (component E). Walks a validated configuration and
//! enumerates the Cartesian product of every modification argument atom
//! across both pipelines, yielding one concrete [`Test`] per combination.

use crate::atoms::{Atom, Value};
use crate::config::ResolvedModDescriptor;
use crate::errors::{ArgumentError, InternalError, SuiteError};
use crate::modifications::{Modification, ModificationKind, Registry};
use crate::pipeline::{Direction, ModificationPipeline, PipelineStep};

/// One atom position within one pipeline: which descriptor it belongs to,
/// which argument index within that descriptor, and the atom itself.
struct AtomSlot<'a> {
    direction: Direction,
    descriptor_index: usize,
    arg_index: usize,
    atom: &'a Atom,
}

/// A single concrete test: the resolved argument tuple plus the index the
/// expander assigned it (§3 `Test`, minus diversion rules and command,
/// which the runtime binds from the surrounding configuration).
pub struct Test {
    pub index: usize,
    pub input_args: Vec<Vec<Value>>,
    pub output_args: Vec<Vec<Value>>,
}

/// Expands `input`/`output` descriptor lists into every concrete `Test`,
/// iterating with the earliest modification's atom as the slowest-changing
/// index (§4.E).
pub fn expand(
    input: &[ResolvedModDescriptor],
    output: &[ResolvedModDescriptor],
) -> Result<Vec<Test>, InternalError> {
    let slots = collect_slots(input, output);
    let total: usize = slots.iter().map(|s| s.atom.cardinality()).product();
    let total = if slots.is_empty() { 1 } else { total };

    let mut tests = Vec::with_capacity(total);
    for index in 0..total {
        let mut input_args: Vec<Vec<Value>> = input.iter().map(|d| vec![Value::None; d.atoms.len()]).collect();
        let mut output_args: Vec<Vec<Value>> = output.iter().map(|d| vec![Value::None; d.atoms.len()]).collect();

        // Earliest slot is the slowest-changing index: its stride is the
        // product of every later slot's cardinality.
        let mut stride = 1usize;
        for slot in slots.iter().rev() {
            let card = slot.atom.cardinality().max(1);
            let values = slot.atom.values();
            let local = (index / stride) % card;
            let value = values.get(local).cloned().unwrap_or(Value::None);
            match slot.direction {
                Direction::Input => input_args[slot.descriptor_index][slot.arg_index] = value,
                Direction::Output => output_args[slot.descriptor_index][slot.arg_index] = value,
            }
            stride *= card;
        }

        tests.push(Test {
            index,
            input_args,
            output_args,
        });
    }

    if tests.len() != total {
        return Err(InternalError(format!(
            "expander produced {} tests, expected {total}",
            tests.len()
        )));
    }
    Ok(tests)
}

fn collect_slots<'a>(
    input: &'a [ResolvedModDescriptor],
    output: &'a [ResolvedModDescriptor],
) -> Vec<AtomSlot<'a>> {
    let mut slots = Vec::new();
    for (descriptor_index, descriptor) in input.iter().enumerate() {
        for (arg_index, atom) in descriptor.atoms.iter().enumerate() {
            slots.push(AtomSlot {
                direction: Direction::Input,
                descriptor_index,
                arg_index,
                atom,
            });
        }
    }
    for (descriptor_index, descriptor) in output.iter().enumerate() {
        for (arg_index, atom) in descriptor.atoms.iter().enumerate() {
            slots.push(AtomSlot {
                direction: Direction::Output,
                descriptor_index,
                arg_index,
                atom,
            });
        }
    }
    slots
}

/// Binds one [`Test`]'s argument tuple to concrete [`Modification`]
/// instances, producing the two pipelines the runtime drives packets
/// through.
pub fn build_pipelines(
    registry: &Registry,
    input: &[ResolvedModDescriptor],
    output: &[ResolvedModDescriptor],
    test: &Test,
) -> Result<(ModificationPipeline, ModificationPipeline), SuiteError> {
    let input_pipeline = build_one(registry, Direction::Input, input, &test.input_args)?;
    let output_pipeline = build_one(registry, Direction::Output, output, &test.output_args)?;
    Ok((input_pipeline, output_pipeline))
}

fn build_one(
    registry: &Registry,
    direction: Direction,
    descriptors: &[ResolvedModDescriptor],
    args: &[Vec<Value>],
) -> Result<ModificationPipeline, SuiteError> {
    let mut steps = Vec::with_capacity(descriptors.len());
    for (descriptor, values) in descriptors.iter().zip(args.iter()) {
        let kind = registry.lookup(&descriptor.mod_name)?;
        let modification = parse_args_checked(kind, values)?;
        steps.push(PipelineStep {
            modification,
            optional: descriptor.optional,
        });
    }
    Ok(ModificationPipeline::new(direction, steps))
}

fn parse_args_checked(
    kind: &dyn ModificationKind,
    values: &[Value],
) -> Result<Box<dyn Modification>, ArgumentError> {
    kind.parse_args(values)
}
