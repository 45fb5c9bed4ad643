use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    Instructions,
    ProblemPresentation,
    Coding,
    SystemDesign,
    Behavioral,
    SolutionReview,
    Closing,
    #[default]
    #[serde(other)]
    General,
}

impl PhaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseType::Instructions => "instructions",
            PhaseType::ProblemPresentation => "problem_presentation",
            PhaseType::Coding => "coding",
            PhaseType::SystemDesign => "system_design",
            PhaseType::Behavioral => "behavioral",
            PhaseType::SolutionReview => "solution_review",
            PhaseType::Closing => "closing",
            PhaseType::General => "general",
        }
    }
}

/// Externally supplied phase description, validated by `PhasePlan::new`.
///
/// `duration_secs` is signed so that malformed input reaches validation
/// instead of failing deserialization with an opaque message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDescriptor {
    pub sequence: u32,
    pub question_id: String,
    pub duration_secs: i64,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub phase_type: PhaseType,
    #[serde(default)]
    pub question_text: Option<String>,
    #[serde(default)]
    pub knowledge_bank_id: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

/// One validated, immutable phase of a plan.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDefinition {
    pub sequence: u32,
    pub question_id: String,
    pub duration_secs: u64,
    pub instructions: String,
    pub phase_type: PhaseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_bank_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
}

impl PhaseDefinition {
    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.duration_secs)
    }
}

/// Compact phase view carried by snapshots and events.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSummary {
    pub index: usize,
    pub sequence: u32,
    pub question_id: String,
    pub phase_type: PhaseType,
    pub duration_secs: u64,
}

impl PhaseSummary {
    pub fn of(index: usize, phase: &PhaseDefinition) -> Self {
        Self {
            index,
            sequence: phase.sequence,
            question_id: phase.question_id.clone(),
            phase_type: phase.phase_type,
            duration_secs: phase.duration_secs,
        }
    }
}
