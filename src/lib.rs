//! A declarative test-suite generator and executor for network-packet
//! modification scenarios.
//!
//! A configuration describes a command to run, a set of kernel packet
//! selectors to divert into this process, and two modification pipelines
//! (input/output). Any argument of any modification may be a scalar, a
//! sequence, or a range; [`expander`] walks the Cartesian product of those
//! argument atoms and [`runtime`] executes one concrete pipeline per test,
//! installing diversion rules, routing diverted packets through
//! [`pipeline`], and recording the command's exit status via
//! [`aggregator`].

pub mod aggregator;
pub mod atoms;
pub mod carrier;
pub mod cli;
pub mod config;
pub mod diversion;
pub mod errors;
pub mod expander;
pub mod ipv6;
pub mod modifications;
pub mod packet;
pub mod pipeline;
pub mod rng;
pub mod runtime;

pub use aggregator::{Outcome, ResultAggregator, Summary, TestResult};
pub use carrier::{CarrierEntry, PacketCarrier};
pub use config::RawConfig;
pub use errors::{SuiteError, TestError};
pub use expander::Test;
pub use modifications::Registry;
pub use packet::Packet;
pub use pipeline::{Direction, ModificationPipeline};
