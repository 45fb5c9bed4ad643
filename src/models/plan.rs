use std::time::Duration;

use serde::Serialize;

use crate::error::PlanError;

use super::{PhaseDefinition, PhaseDescriptor};

/// Upper bound for a single phase. Keeps every deadline representable as an
/// `Instant` and plan totals well inside `u64`.
pub const MAX_PHASE_DURATION_SECS: u64 = 24 * 60 * 60;

/// Ordered, validated phases for one session. Read-only once built.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PhasePlan {
    phases: Vec<PhaseDefinition>,
}

impl PhasePlan {
    /// Validates the whole descriptor list before building anything, so a
    /// rejected plan is never partially applied.
    pub fn new(descriptors: Vec<PhaseDescriptor>) -> Result<Self, PlanError> {
        if descriptors.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut previous: Option<u32> = None;
        for descriptor in &descriptors {
            if descriptor.duration_secs <= 0 {
                return Err(PlanError::NonPositiveDuration {
                    sequence: descriptor.sequence,
                    duration_secs: descriptor.duration_secs,
                });
            }
            if descriptor.duration_secs as u64 > MAX_PHASE_DURATION_SECS {
                return Err(PlanError::DurationTooLong {
                    sequence: descriptor.sequence,
                    duration_secs: descriptor.duration_secs,
                    max_secs: MAX_PHASE_DURATION_SECS,
                });
            }
            if let Some(prev) = previous {
                if descriptor.sequence <= prev {
                    return Err(PlanError::SequenceNotIncreasing {
                        previous: prev,
                        next: descriptor.sequence,
                    });
                }
            }
            previous = Some(descriptor.sequence);
        }

        let phases = descriptors
            .into_iter()
            .map(|d| PhaseDefinition {
                sequence: d.sequence,
                question_id: d.question_id,
                // In (0, MAX_PHASE_DURATION_SECS] after the checks above.
                duration_secs: d.duration_secs as u64,
                instructions: d.instructions,
                phase_type: d.phase_type,
                question_text: d.question_text,
                knowledge_bank_id: d.knowledge_bank_id,
                tools: d.tools,
            })
            .collect();

        Ok(Self { phases })
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Always false for a constructed plan; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Lookup by position in the plan (0-based), not by sequence number.
    pub fn get(&self, index: usize) -> Option<&PhaseDefinition> {
        self.phases.get(index)
    }

    pub fn by_sequence(&self, sequence: u32) -> Option<&PhaseDefinition> {
        self.phases
            .binary_search_by_key(&sequence, |p| p.sequence)
            .ok()
            .map(|idx| &self.phases[idx])
    }

    pub fn phases(&self) -> &[PhaseDefinition] {
        &self.phases
    }

    pub fn total_duration_secs(&self) -> u64 {
        self.phases.iter().map(|p| p.duration_secs).sum()
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_secs(self.total_duration_secs())
    }
}
