use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{models::PhaseSummary, timer::TimerStatusSnapshot};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseChangedPayload {
    pub previous: PhaseSummary,
    pub current: PhaseSummary,
    pub instructions: String,
    pub transition_count: u32,
    pub status: TimerStatusSnapshot,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStartedPayload {
    pub phase: PhaseSummary,
    pub instructions: String,
    pub status: TimerStatusSnapshot,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    pub total_transitions: u32,
    pub total_phases: usize,
    pub session_duration_secs: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    /// Room sequence numbers this observer never received.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lost_sequences: Vec<u64>,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            lost_sequences: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    Connected(TimerStatusSnapshot),
    PhaseStarted(PhaseStartedPayload),
    PhaseChanged(PhaseChangedPayload),
    InterviewCompleted(CompletionPayload),
    Heartbeat(TimerStatusSnapshot),
    Error(ErrorPayload),
    TimerPaused(TimerStatusSnapshot),
    TimerResumed(TimerStatusSnapshot),
    TimerReset(TimerStatusSnapshot),
    SessionEnded(TimerStatusSnapshot),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected(_) => "connected",
            EventKind::PhaseStarted(_) => "phase_started",
            EventKind::PhaseChanged(_) => "phase_changed",
            EventKind::InterviewCompleted(_) => "interview_completed",
            EventKind::Heartbeat(_) => "heartbeat",
            EventKind::Error(_) => "error",
            EventKind::TimerPaused(_) => "timer_paused",
            EventKind::TimerResumed(_) => "timer_resumed",
            EventKind::TimerReset(_) => "timer_reset",
            EventKind::SessionEnded(_) => "session_ended",
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, EventKind::Heartbeat(_))
    }
}

/// One immutable event, ordered within its room by `sequence`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub room_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(room_id: impl Into<String>, sequence: u64, kind: EventKind) -> Self {
        Self {
            room_id: room_id.into(),
            sequence,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Server-sent-events frame: `event:` line with the variant name and a
    /// single `data:` line holding the JSON envelope.
    pub fn to_sse(&self) -> serde_json::Result<String> {
        let data = serde_json::to_string(self)?;
        Ok(format!(
            "id: {}\nevent: {}\ndata: {}\n\n",
            self.sequence,
            self.name(),
            data
        ))
    }
}
