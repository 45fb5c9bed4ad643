//! Error taxonomy for the session engine.
//!
//! Every timer and registry failure is a local validation error returned to
//! the caller. Nothing here is retried automatically.

use thiserror::Error;

use crate::timer::RunState;

/// Reasons a phase plan is rejected at construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("phase plan is empty")]
    Empty,

    #[error("phase {sequence} has non-positive duration {duration_secs}s")]
    NonPositiveDuration { sequence: u32, duration_secs: i64 },

    #[error("phase {sequence} lasts {duration_secs}s, longer than the {max_secs}s limit")]
    DurationTooLong {
        sequence: u32,
        duration_secs: i64,
        max_secs: u64,
    },

    #[error("phase sequence numbers must strictly increase ({previous} followed by {next})")]
    SequenceNotIncreasing { previous: u32, next: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid phase plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("session {room_id} already started (state: {state})")]
    AlreadyStarted { room_id: String, state: RunState },

    #[error("session {room_id} is not running (state: {state})")]
    NotRunning { room_id: String, state: RunState },

    #[error("session {room_id} is not paused (state: {state})")]
    NotPaused { room_id: String, state: RunState },

    #[error("no active session in room {room_id}")]
    NoActiveSession { room_id: String },

    #[error("session not found: {room_id}")]
    SessionNotFound { room_id: String },

    /// An observer's buffer evicted an event that was not a heartbeat.
    #[error("subscriber {subscriber_id} in room {room_id} overflowed and lost a {event} event")]
    DeliveryOverflow {
        room_id: String,
        subscriber_id: String,
        event: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A collaborator (signaling gateway, event sink) failed.
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

impl EngineError {
    /// Stable machine-readable code for external responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidPlan(_) => "invalid_plan",
            EngineError::AlreadyStarted { .. } => "already_started",
            EngineError::NotRunning { .. } => "not_running",
            EngineError::NotPaused { .. } => "not_paused",
            EngineError::NoActiveSession { .. } => "no_active_session",
            EngineError::SessionNotFound { .. } => "session_not_found",
            EngineError::DeliveryOverflow { .. } => "delivery_overflow",
            EngineError::InvalidArgument(_) => "invalid_argument",
            EngineError::Collaborator(_) => "collaborator_failure",
        }
    }

    /// HTTP-style status a transport should surface for this error.
    pub fn status(&self) -> u16 {
        match self {
            EngineError::InvalidPlan(_) | EngineError::InvalidArgument(_) => 400,
            EngineError::SessionNotFound { .. } => 404,
            EngineError::AlreadyStarted { .. }
            | EngineError::NotRunning { .. }
            | EngineError::NotPaused { .. }
            | EngineError::NoActiveSession { .. } => 409,
            EngineError::DeliveryOverflow { .. } | EngineError::Collaborator(_) => 500,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
