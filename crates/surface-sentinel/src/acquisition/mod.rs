//! Surface acquisition: probe, structural monitor, state machine and driver.

pub mod driver;
pub mod machine;
pub mod monitor;
pub mod probe;

pub use driver::{AcquisitionDriver, AcquisitionOutcome};
pub use machine::{
    AcquisitionEvent, AcquisitionMachine, AcquisitionState, Effect, ProbeCause, TimerKind,
};
pub use monitor::StructuralMonitor;
pub use probe::{probe, ProbeOutcome, ProbeReport};
