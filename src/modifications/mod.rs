//! Modification kinds and the compile-time registry that discovers them by
//! name (component B), replacing the directory-scanned plug-in loader the
//! original tool used (§9).

mod delay;
mod drop;
mod duplicate;
mod echo;
mod fragment;
mod overlap;
mod print;
mod reorder;
mod segment;
mod select;

use crate::atoms::Value;
use crate::carrier::PacketCarrier;
use crate::errors::{ArgumentError, ModificationRuntimeError, UnknownModification};
use rand::rngs::StdRng;
use std::collections::HashMap;

/// A concrete, fully-parameterised modification instance bound into a
/// pipeline. `apply` is the only operation the runtime calls once a test is
/// running; everything else (`parse_args`, `usage`) belongs to the kind.
pub trait Modification: Send + Sync {
    /// Applies this modification to `carrier`, returning the carrier that
    /// results. `rng` backs any modification whose behaviour is
    /// inherently randomised (§4.B); deterministic modifications ignore it.
    fn apply(
        &self,
        carrier: PacketCarrier,
        rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError>;

    /// Human-readable one-line dump for logs.
    fn describe(&self) -> String;
}

/// The kind-level object the registry stores: a name, a usage string, and a
/// factory from resolved arguments to a concrete [`Modification`].
pub trait ModificationKind: Send + Sync {
    fn name(&self) -> &'static str;
    fn usage(&self) -> &'static str;
    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError>;
}

/// Helper shared by every built-in's `parse_args`: checks arity before
/// looking at argument contents so arity mistakes produce a clear error.
fn expect_arity<'a>(
    name: &str,
    args: &'a [Value],
    expected: usize,
) -> Result<&'a [Value], ArgumentError> {
    if args.len() != expected {
        return Err(ArgumentError::WrongArgumentCount {
            name: name.to_owned(),
            expected: match expected {
                0 => "0",
                1 => "1",
                2 => "2",
                _ => "?",
            },
            got: args.len(),
        });
    }
    Ok(args)
}

fn expect_arity_range<'a>(
    name: &str,
    args: &'a [Value],
    min: usize,
    max: usize,
) -> Result<&'a [Value], ArgumentError> {
    if args.len() < min || args.len() > max {
        return Err(ArgumentError::WrongArgumentCount {
            name: name.to_owned(),
            expected: "1..=2",
            got: args.len(),
        });
    }
    Ok(args)
}

/// The compile-time registry of built-in modification kinds.
pub struct Registry {
    kinds: HashMap<&'static str, Box<dyn ModificationKind>>,
}

impl Registry {
    pub fn with_builtins() -> Self {
        let builtins: Vec<Box<dyn ModificationKind>> = vec![
            Box::new(drop::DropOneKind),
            Box::new(drop::DropProbaKind),
            Box::new(echo::EchoKind),
            Box::new(print::PrintKind),
            Box::new(duplicate::DuplicateKind),
            Box::new(reorder::ReorderKind),
            Box::new(select::SelectKind),
            Box::new(fragment::Fragment4Kind),
            Box::new(fragment::Fragment6Kind),
            Box::new(segment::SegmentKind),
            Box::new(overlap::OverlapKind),
            Box::new(delay::DelayKind),
        ];
        let kinds = builtins.into_iter().map(|k| (k.name(), k)).collect();
        Registry { kinds }
    }

    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.kinds.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn ModificationKind, UnknownModification> {
        self.kinds
            .get(name)
            .map(|boxed| boxed.as_ref())
            .ok_or_else(|| UnknownModification {
                name: name.to_owned(),
            })
    }

    pub fn usage(&self, name: &str) -> Result<&'static str, UnknownModification> {
        self.lookup(name).map(|k| k.usage())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
