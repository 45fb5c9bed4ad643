//! Interview session engine.
//!
//! Each room runs a [`SessionTimer`] through an ordered [`PhasePlan`],
//! advancing on phase deadlines, with pause/resume/reset under manual
//! control. Every transition is published through the room's
//! [`EventBroadcaster`] to any number of observers.

pub mod broadcast;
pub mod control;
mod engine;
pub mod error;
pub mod models;
pub mod registry;
pub mod settings;
pub mod timer;
pub mod utils;

pub use broadcast::{
    spawn_delivery, ChannelSink, DeliveryHandle, DeliveryOutcome, Event, EventBroadcaster,
    EventKind, EventSink, HeartbeatService, Subscription,
};
pub use control::{ControlSurface, ErrorResponse, SignalingGateway};
pub use engine::InterviewEngine;
pub use error::{EngineError, EngineResult, PlanError};
pub use models::{PhaseDefinition, PhaseDescriptor, PhasePlan, PhaseType};
pub use registry::{RoomSummary, SessionRegistry};
pub use settings::{EngineSettings, SettingsStore};
pub use timer::{RunState, SessionTimer, TimerStatusSnapshot};
pub use utils::init_logging;
