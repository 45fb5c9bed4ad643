mod phase;
mod plan;

pub use phase::{PhaseDefinition, PhaseDescriptor, PhaseSummary, PhaseType};
pub use plan::{PhasePlan, MAX_PHASE_DURATION_SECS};

#[cfg(test)]
pub(crate) use plan::tests::descriptor;
