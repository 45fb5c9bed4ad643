//! External command surface. Validates arguments, dispatches onto the
//! registry, timers and broadcasters, and turns domain errors into
//! `ErrorResponse` values. Holds no state of its own.

mod types;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    broadcast::{spawn_delivery, DeliveryHandle, EventSink, Subscription},
    error::EngineError,
    models::PhasePlan,
    registry::SessionRegistry,
    timer::{ContextKind, RunState, SessionTimer},
};

pub use types::{
    CommandAck, CommandResult, ConnectionsStatus, ErrorResponse, InjectCustomContextRequest,
    InjectProblemRequest, InjectionResponse, RoomStatus, SdpAnswer, SdpOffer, SetPhaseRequest,
    StartInterviewRequest, StartInterviewResponse,
};

/// WebRTC signaling collaborator; media handling lives outside this crate.
#[async_trait]
pub trait SignalingGateway: Send + Sync {
    /// `existing` is true when the room already had a session, in which case
    /// the gateway should renegotiate rather than open a new connection.
    async fn answer(&self, room_id: &str, offer: &SdpOffer, existing: bool) -> Result<SdpAnswer>;
}

#[derive(Clone)]
pub struct ControlSurface {
    registry: Arc<SessionRegistry>,
    signaling: Option<Arc<dyn SignalingGateway>>,
}

fn validate_room_id(room_id: &str) -> Result<&str, EngineError> {
    let trimmed = room_id.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidArgument("room_id must not be empty".into()));
    }
    Ok(trimmed)
}

fn validate_text<'a>(field: &str, text: &'a str) -> Result<&'a str, EngineError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

impl ControlSurface {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            signaling: None,
        }
    }

    pub fn with_signaling(mut self, gateway: Arc<dyn SignalingGateway>) -> Self {
        self.signaling = Some(gateway);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn timer(&self, room_id: &str) -> Result<SessionTimer, EngineError> {
        let room_id = validate_room_id(room_id)?;
        self.registry.require(room_id)
    }

    pub async fn start_interview(
        &self,
        request: StartInterviewRequest,
    ) -> CommandResult<StartInterviewResponse> {
        let room_id = validate_room_id(&request.room_id)?;
        // Validate the whole plan before touching the registry.
        let plan = Arc::new(PhasePlan::new(request.phases).map_err(EngineError::from)?);
        let timer = self.registry.get_or_create(room_id);

        let (status, message) = if request.auto_start {
            (timer.start(plan).await?, "Interview session started")
        } else {
            (timer.load(plan).await?, "Interview session created; timer not started")
        };
        let session_id = Uuid::new_v4();
        info!("Interview session {session_id} prepared for room {room_id}");

        Ok(StartInterviewResponse {
            success: true,
            message: message.to_string(),
            room_id: room_id.to_string(),
            session_id,
            interview_type: request
                .interview_type
                .unwrap_or_else(|| "technical".to_string()),
            status,
        })
    }

    /// Hands a WebRTC offer to the signaling collaborator, reusing the room
    /// when it already exists.
    pub async fn offer(&self, room_id: &str, offer: SdpOffer) -> CommandResult<SdpAnswer> {
        let room_id = validate_room_id(room_id)?;
        validate_text("sdp", &offer.sdp)?;
        let gateway = self.signaling.as_ref().ok_or_else(|| {
            EngineError::Collaborator("no signaling gateway configured".into())
        })?;

        let existing = self.registry.contains(room_id);
        let answer = gateway
            .answer(room_id, &offer, existing)
            .await
            .map_err(|err| {
                warn!("Signaling failed for room {room_id}: {err:#}");
                EngineError::Collaborator(format!("{err:#}"))
            })?;
        self.registry.get_or_create(room_id);
        Ok(answer)
    }

    pub async fn inject_problem(
        &self,
        request: InjectProblemRequest,
    ) -> CommandResult<InjectionResponse> {
        let text = validate_text("problem_text", &request.problem_text)?;
        let context_type = request.problem_type.as_deref().unwrap_or("coding");
        self.inject(&request.room_id, ContextKind::Problem, context_type, text)
            .await
    }

    pub async fn inject_custom_context(
        &self,
        request: InjectCustomContextRequest,
    ) -> CommandResult<InjectionResponse> {
        let text = validate_text("context_text", &request.context_text)?;
        let context_type = request.context_type.as_deref().unwrap_or("general");
        self.inject(&request.room_id, ContextKind::Custom, context_type, text)
            .await
    }

    async fn inject(
        &self,
        room_id: &str,
        kind: ContextKind,
        context_type: &str,
        text: &str,
    ) -> CommandResult<InjectionResponse> {
        let timer = self.timer(room_id)?;
        let context = timer.inject_context(kind, context_type, text).await?;
        Ok(InjectionResponse {
            success: true,
            message: format!("Context injected into phase {}", context.phase_sequence),
            context,
            status: timer.status(),
        })
    }

    /// Starts a staged plan, or resumes a paused timer.
    pub async fn start_timer(&self, room_id: &str) -> CommandResult<CommandAck> {
        let timer = self.timer(room_id)?;
        if timer.run_state() == RunState::Paused {
            return Ok(CommandAck::new("Interview timer resumed", timer.resume().await?));
        }
        Ok(CommandAck::new("Interview timer started", timer.start_staged().await?))
    }

    pub async fn pause_timer(&self, room_id: &str) -> CommandResult<CommandAck> {
        let timer = self.timer(room_id)?;
        Ok(CommandAck::new("Interview timer paused", timer.pause().await?))
    }

    pub async fn resume_timer(&self, room_id: &str) -> CommandResult<CommandAck> {
        let timer = self.timer(room_id)?;
        Ok(CommandAck::new("Interview timer resumed", timer.resume().await?))
    }

    pub async fn reset_timer(&self, room_id: &str) -> CommandResult<CommandAck> {
        let timer = self.timer(room_id)?;
        Ok(CommandAck::new("Interview timer reset", timer.reset().await?))
    }

    /// Moves the room to the phase with the requested sequence number.
    pub async fn set_phase(&self, request: SetPhaseRequest) -> CommandResult<CommandAck> {
        let timer = self.timer(&request.room_id)?;
        let status = timer.set_phase(request.sequence).await?;
        Ok(CommandAck::new(
            format!("Interview phase set to {}", request.sequence),
            status,
        ))
    }

    /// Ends the current phase early.
    pub async fn advance_phase(&self, room_id: &str) -> CommandResult<CommandAck> {
        let timer = self.timer(room_id)?;
        Ok(CommandAck::new("Interview phase advanced", timer.advance_phase().await?))
    }

    pub fn status(&self, room_id: &str) -> CommandResult<RoomStatus> {
        let timer = self.timer(room_id)?;
        // One copy, so the snapshot, phase and contexts describe the same moment.
        let state = timer.state();
        let phase = state.current_phase().cloned();
        Ok(RoomStatus {
            room_id: timer.room_id().to_string(),
            status: state.snapshot(Instant::now()),
            active_instructions: phase.as_ref().map(|p| p.instructions.clone()),
            phase,
            injected_context: state.active_contexts(),
            subscribers: timer.broadcaster().subscriber_stats(),
        })
    }

    pub fn list_connections(&self) -> ConnectionsStatus {
        let rooms = self.registry.list();
        ConnectionsStatus {
            total_rooms: rooms.len(),
            running: rooms.iter().filter(|r| r.state == RunState::Running).count(),
            paused: rooms.iter().filter(|r| r.state == RunState::Paused).count(),
            total_subscribers: rooms.iter().map(|r| r.subscribers).sum(),
            rooms,
        }
    }

    /// Ends the session and removes the room.
    pub async fn close(&self, room_id: &str) -> CommandResult<CommandAck> {
        let timer = self.timer(room_id)?;
        self.registry.remove(timer.room_id()).await;
        Ok(CommandAck::new(
            format!("Connection closed for room {}", timer.room_id()),
            timer.status(),
        ))
    }

    pub async fn subscribe(&self, room_id: &str) -> CommandResult<Subscription> {
        let timer = self.timer(room_id)?;
        Ok(timer.subscribe().await)
    }

    /// Attaches `sink` to the room's event stream on its own delivery task.
    pub async fn open_stream<S>(&self, room_id: &str, sink: S) -> CommandResult<DeliveryHandle>
    where
        S: EventSink + 'static,
    {
        let subscription = self.subscribe(room_id).await?;
        let timeout = self.registry.settings().delivery_timeout();
        Ok(spawn_delivery(subscription, sink, timeout))
    }
}
