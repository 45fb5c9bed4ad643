use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    error::{EngineError, EngineResult},
    models::{PhaseDefinition, PhasePlan, PhaseSummary},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Ended,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Completed => "completed",
            RunState::Ended => "ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Ended)
    }

    /// Running or paused: a plan is attached and the phase index is in range.
    pub fn is_live(&self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Problem,
    Custom,
}

/// Free text attached to the phase that was current when it was injected.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InjectedContext {
    pub id: Uuid,
    pub kind: ContextKind,
    pub context_type: String,
    pub text: String,
    pub phase_index: usize,
    pub phase_sequence: u32,
    pub injected_at: DateTime<Utc>,
}

/// Outcome of a deadline-driven advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    PhaseChanged { from: usize, to: usize },
    Completed { total_transitions: u32 },
}

/// Point-in-time view of a timer, recomputed on every read.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimerStatusSnapshot {
    pub room_id: String,
    pub state: RunState,
    pub is_running: bool,
    pub is_paused: bool,
    pub current_phase: Option<PhaseSummary>,
    pub total_phases: usize,
    pub elapsed_secs: u64,
    pub remaining_secs: u64,
    pub progress_percent: f64,
    pub transitions_completed: u32,
    pub total_paused_secs: u64,
    pub session_started_at: Option<DateTime<Utc>>,
}

/// The deterministic core of a session timer. All clock readings are passed
/// in, so every transition can be exercised without real time passing.
#[derive(Debug, Clone)]
pub struct TimerState {
    room_id: String,
    status: RunState,
    plan: Option<Arc<PhasePlan>>,
    phase_index: usize,
    phase_started_at: Option<Instant>,
    paused_at: Option<Instant>,
    /// Accumulated pause time across the whole session.
    paused_total: Duration,
    transitions: u32,
    session_started_at: Option<DateTime<Utc>>,
    terminal_at: Option<Instant>,
    contexts: Vec<InjectedContext>,
    /// Bumped by every command that invalidates a scheduled deadline.
    generation: u64,
    /// Set once the room has been removed from its registry. A retired timer
    /// rejects every command as if the room did not exist.
    retired: bool,
}

impl TimerState {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            status: RunState::Idle,
            plan: None,
            phase_index: 0,
            phase_started_at: None,
            paused_at: None,
            paused_total: Duration::ZERO,
            transitions: 0,
            session_started_at: None,
            terminal_at: None,
            contexts: Vec::new(),
            generation: 0,
            retired: false,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn status(&self) -> RunState {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn plan(&self) -> Option<&Arc<PhasePlan>> {
        self.plan.as_ref()
    }

    pub fn phase_index(&self) -> usize {
        self.phase_index
    }

    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    pub fn terminal_at(&self) -> Option<Instant> {
        self.terminal_at
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    fn ensure_registered(&self) -> EngineResult<()> {
        if self.retired {
            return Err(EngineError::SessionNotFound {
                room_id: self.room_id.clone(),
            });
        }
        Ok(())
    }

    pub fn current_phase(&self) -> Option<&PhaseDefinition> {
        if !self.status.is_live() {
            return None;
        }
        self.plan.as_ref().and_then(|plan| plan.get(self.phase_index))
    }

    /// Injections for the current phase only; earlier ones are inert.
    pub fn active_contexts(&self) -> Vec<InjectedContext> {
        if !self.status.is_live() {
            return Vec::new();
        }
        self.contexts
            .iter()
            .filter(|ctx| ctx.phase_index == self.phase_index)
            .cloned()
            .collect()
    }

    /// Attach a plan without starting it.
    pub fn load(&mut self, plan: Arc<PhasePlan>) -> EngineResult<()> {
        self.ensure_registered()?;
        if self.status != RunState::Idle {
            return Err(EngineError::AlreadyStarted {
                room_id: self.room_id.clone(),
                state: self.status,
            });
        }
        self.plan = Some(plan);
        Ok(())
    }

    pub fn start(
        &mut self,
        plan: Arc<PhasePlan>,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.ensure_registered()?;
        if self.status != RunState::Idle {
            return Err(EngineError::AlreadyStarted {
                room_id: self.room_id.clone(),
                state: self.status,
            });
        }
        self.plan = Some(plan);
        self.begin(now, wall);
        Ok(())
    }

    pub fn pause(&mut self, now: Instant) -> EngineResult<()> {
        self.ensure_registered()?;
        if self.status != RunState::Running {
            return Err(EngineError::NotRunning {
                room_id: self.room_id.clone(),
                state: self.status,
            });
        }
        self.status = RunState::Paused;
        self.paused_at = Some(now);
        self.generation += 1;
        Ok(())
    }

    /// Shifts the phase start forward by the pause length so elapsed time is
    /// continuous across the pause.
    pub fn resume(&mut self, now: Instant) -> EngineResult<()> {
        self.ensure_registered()?;
        if self.status != RunState::Paused {
            return Err(EngineError::NotPaused {
                room_id: self.room_id.clone(),
                state: self.status,
            });
        }
        let paused_for = self
            .paused_at
            .take()
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        self.paused_total += paused_for;
        self.phase_started_at = self.phase_started_at.map(|start| start + paused_for);
        self.status = RunState::Running;
        self.generation += 1;
        Ok(())
    }

    /// Re-arms the session at phase 0 from any state that has a plan.
    pub fn reset(&mut self, now: Instant, wall: DateTime<Utc>) -> EngineResult<()> {
        self.ensure_registered()?;
        if self.plan.is_none() {
            return Err(EngineError::NoActiveSession {
                room_id: self.room_id.clone(),
            });
        }
        self.begin(now, wall);
        Ok(())
    }

    /// Returns false when the session was already ended.
    pub fn end(&mut self, now: Instant) -> bool {
        if self.status == RunState::Ended {
            return false;
        }
        self.status = RunState::Ended;
        self.paused_at = None;
        self.terminal_at = Some(now);
        self.generation += 1;
        true
    }

    /// Ends the session for good. Returns whether the run state changed.
    pub fn retire(&mut self, now: Instant) -> bool {
        let ended = self.end(now);
        self.retired = true;
        ended
    }

    /// True when the session is terminal and has been for at least `idle`.
    pub fn idle_for(&self, now: Instant, idle: Duration) -> bool {
        self.status.is_terminal()
            && self
                .terminal_at
                .map(|at| now.saturating_duration_since(at) >= idle)
                .unwrap_or(false)
    }

    /// Manually moves to the phase with `sequence`. The new phase starts at
    /// `now`; a paused session stays paused with zero elapsed. Returns `None`
    /// when that phase is already current.
    pub fn jump_to(&mut self, sequence: u32, now: Instant) -> EngineResult<Option<Transition>> {
        self.ensure_registered()?;
        let plan = self.live_plan()?;
        let to = plan
            .phases()
            .iter()
            .position(|p| p.sequence == sequence)
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!("no phase with sequence {sequence} in plan"))
            })?;
        if to == self.phase_index {
            return Ok(None);
        }
        Ok(Some(self.enter_phase(to, now)))
    }

    /// Manually ends the current phase early. Skipping the last phase
    /// completes the session.
    pub fn skip(&mut self, now: Instant) -> EngineResult<Transition> {
        self.ensure_registered()?;
        let plan = self.live_plan()?;
        let to = self.phase_index + 1;
        if to < plan.len() {
            return Ok(self.enter_phase(to, now));
        }
        self.generation += 1;
        Ok(self.complete(plan.len(), now))
    }

    fn live_plan(&self) -> EngineResult<Arc<PhasePlan>> {
        match (&self.plan, self.status.is_live()) {
            (Some(plan), true) => Ok(plan.clone()),
            _ => Err(EngineError::NoActiveSession {
                room_id: self.room_id.clone(),
            }),
        }
    }

    fn enter_phase(&mut self, to: usize, now: Instant) -> Transition {
        let from = self.phase_index;
        self.phase_index = to;
        self.phase_started_at = Some(now);
        if self.status == RunState::Paused {
            if let Some(at) = self.paused_at.replace(now) {
                self.paused_total += now.saturating_duration_since(at);
            }
        }
        self.transitions += 1;
        self.generation += 1;
        Transition::PhaseChanged { from, to }
    }

    fn complete(&mut self, plan_len: usize, now: Instant) -> Transition {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(at);
        }
        self.phase_index = plan_len;
        self.status = RunState::Completed;
        self.phase_started_at = None;
        self.terminal_at = Some(now);
        Transition::Completed {
            total_transitions: self.transitions,
        }
    }

    pub fn inject(
        &mut self,
        kind: ContextKind,
        context_type: impl Into<String>,
        text: impl Into<String>,
        wall: DateTime<Utc>,
    ) -> EngineResult<InjectedContext> {
        self.ensure_registered()?;
        let phase_sequence = match self.current_phase() {
            Some(phase) => phase.sequence,
            None => {
                return Err(EngineError::NoActiveSession {
                    room_id: self.room_id.clone(),
                })
            }
        };
        let context = InjectedContext {
            id: Uuid::new_v4(),
            kind,
            context_type: context_type.into(),
            text: text.into(),
            phase_index: self.phase_index,
            phase_sequence,
            injected_at: wall,
        };
        self.contexts.push(context.clone());
        Ok(context)
    }

    /// Wall-clock instant at which the current phase ends, while running.
    pub fn deadline(&self) -> Option<Instant> {
        if self.status != RunState::Running {
            return None;
        }
        let start = self.phase_started_at?;
        let phase = self.current_phase()?;
        start.checked_add(phase.duration())
    }

    /// Moves past the current phase if its deadline has been reached.
    ///
    /// The next phase starts at the previous deadline rather than `now`, so a
    /// late wakeup does not push the rest of the plan back.
    pub fn advance(&mut self, now: Instant) -> Option<Transition> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        let plan_len = self.plan.as_ref().map(|p| p.len()).unwrap_or(0);
        let from = self.phase_index;
        let to = from + 1;
        if to < plan_len {
            self.phase_index = to;
            self.phase_started_at = Some(deadline);
            self.transitions += 1;
            Some(Transition::PhaseChanged { from, to })
        } else {
            Some(self.complete(plan_len, now))
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        match (self.status, self.phase_started_at) {
            (RunState::Running, Some(start)) => now.saturating_duration_since(start),
            (RunState::Paused, Some(start)) => self
                .paused_at
                .map(|at| at.saturating_duration_since(start))
                .unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    pub fn total_paused(&self, now: Instant) -> Duration {
        match (self.status, self.paused_at) {
            (RunState::Paused, Some(at)) => self.paused_total + now.saturating_duration_since(at),
            _ => self.paused_total,
        }
    }

    pub fn snapshot(&self, now: Instant) -> TimerStatusSnapshot {
        let current = self.current_phase();
        let elapsed_secs = self.elapsed(now).as_secs();
        let (remaining_secs, progress_percent) = match current {
            Some(phase) => {
                let remaining = phase.duration_secs.saturating_sub(elapsed_secs);
                let progress = (elapsed_secs as f64 / phase.duration_secs as f64) * 100.0;
                (remaining, round2(progress.clamp(0.0, 100.0)))
            }
            None if self.status == RunState::Completed => (0, 100.0),
            None => (0, 0.0),
        };

        TimerStatusSnapshot {
            room_id: self.room_id.clone(),
            state: self.status,
            is_running: self.status == RunState::Running,
            is_paused: self.status == RunState::Paused,
            current_phase: current.map(|phase| PhaseSummary::of(self.phase_index, phase)),
            total_phases: self.plan.as_ref().map(|p| p.len()).unwrap_or(0),
            elapsed_secs: if current.is_some() { elapsed_secs } else { 0 },
            remaining_secs,
            progress_percent,
            transitions_completed: self.transitions,
            total_paused_secs: self.total_paused(now).as_secs(),
            session_started_at: self.session_started_at,
        }
    }

    fn begin(&mut self, now: Instant, wall: DateTime<Utc>) {
        self.status = RunState::Running;
        self.phase_index = 0;
        self.phase_started_at = Some(now);
        self.paused_at = None;
        self.paused_total = Duration::ZERO;
        self.transitions = 0;
        self.session_started_at = Some(wall);
        self.terminal_at = None;
        self.contexts.clear();
        self.generation += 1;
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
