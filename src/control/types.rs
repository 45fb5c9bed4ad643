use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    broadcast::SubscriberStats,
    error::EngineError,
    models::{PhaseDefinition, PhaseDescriptor},
    registry::RoomSummary,
    timer::{InjectedContext, TimerStatusSnapshot},
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInterviewRequest {
    pub room_id: String,
    pub phases: Vec<PhaseDescriptor>,
    /// When false the plan is only staged; the timer `start` command runs it.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub interview_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpOffer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    #[serde(default)]
    pub restart_pc: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SdpAnswer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub pc_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectProblemRequest {
    pub room_id: String,
    pub problem_text: String,
    #[serde(default)]
    pub problem_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectCustomContextRequest {
    pub room_id: String,
    pub context_text: String,
    #[serde(default)]
    pub context_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPhaseRequest {
    pub room_id: String,
    pub sequence: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub success: bool,
    pub message: String,
    pub room_id: String,
    pub status: TimerStatusSnapshot,
}

impl CommandAck {
    pub fn new(message: impl Into<String>, status: TimerStatusSnapshot) -> Self {
        Self {
            success: true,
            message: message.into(),
            room_id: status.room_id.clone(),
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInterviewResponse {
    pub success: bool,
    pub message: String,
    pub room_id: String,
    pub session_id: Uuid,
    pub interview_type: String,
    pub status: TimerStatusSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionResponse {
    pub success: bool,
    pub message: String,
    pub context: InjectedContext,
    pub status: TimerStatusSnapshot,
}

/// Status query result: the snapshot plus the current phase's metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub room_id: String,
    pub status: TimerStatusSnapshot,
    pub phase: Option<PhaseDefinition>,
    pub active_instructions: Option<String>,
    pub injected_context: Vec<InjectedContext>,
    pub subscribers: Vec<SubscriberStats>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsStatus {
    pub total_rooms: usize,
    pub running: usize,
    pub paused: usize,
    pub total_subscribers: usize,
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub status: u16,
}

impl From<EngineError> for ErrorResponse {
    fn from(err: EngineError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            error_code: err.code().to_string(),
            status: err.status(),
        }
    }
}

pub type CommandResult<T> = Result<T, ErrorResponse>;
