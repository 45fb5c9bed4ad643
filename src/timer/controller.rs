use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    broadcast::{
        CompletionPayload, EventBroadcaster, EventKind, PhaseChangedPayload, PhaseStartedPayload,
        Subscription,
    },
    error::{EngineError, EngineResult},
    models::{PhasePlan, PhaseSummary},
};
use crate::{room_debug, room_info};

use super::{ContextKind, InjectedContext, RunState, TimerState, TimerStatusSnapshot, Transition};

const ENABLE_LOGS: bool = true;

struct DeadlineTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DeadlineTask {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

struct Inner {
    state: TimerState,
    deadline: Option<DeadlineTask>,
    view_tx: watch::Sender<TimerState>,
}

/// One room's session timer.
///
/// Every mutation, manual or deadline-driven, happens under `inner`, which is
/// the room's single exclusion domain. Events are published while that lock
/// is held so their order matches the order of the state changes. Status
/// reads go through a watch copy and never wait on the lock.
#[derive(Clone)]
pub struct SessionTimer {
    room_id: Arc<str>,
    inner: Arc<Mutex<Inner>>,
    view: watch::Receiver<TimerState>,
    broadcaster: Arc<EventBroadcaster>,
}

impl SessionTimer {
    pub fn new(room_id: &str, broadcaster: Arc<EventBroadcaster>) -> Self {
        let state = TimerState::new(room_id);
        let (view_tx, view) = watch::channel(state.clone());
        Self {
            room_id: Arc::from(room_id),
            inner: Arc::new(Mutex::new(Inner {
                state,
                deadline: None,
                view_tx,
            })),
            view,
            broadcaster,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    /// Lock-free snapshot of the latest committed state, evaluated now.
    pub fn status(&self) -> TimerStatusSnapshot {
        self.view.borrow().snapshot(Instant::now())
    }

    /// Copy of the latest committed state, for callers needing phase metadata.
    pub fn state(&self) -> TimerState {
        self.view.borrow().clone()
    }

    pub fn run_state(&self) -> RunState {
        self.view.borrow().status()
    }

    /// True once the room was removed from its registry.
    pub fn is_retired(&self) -> bool {
        self.view.borrow().is_retired()
    }

    /// Whether both handles drive the same room instance.
    pub fn same_session(&self, other: &SessionTimer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn load(&self, plan: Arc<PhasePlan>) -> EngineResult<TimerStatusSnapshot> {
        let mut inner = self.inner.lock().await;
        inner.state.load(plan)?;
        room_info!(self.room_id, "plan staged");
        Ok(self.commit(&mut inner))
    }

    pub async fn start(&self, plan: Arc<PhasePlan>) -> EngineResult<TimerStatusSnapshot> {
        let mut inner = self.inner.lock().await;
        let phases = plan.len();
        inner.state.start(plan, Instant::now(), Utc::now())?;
        room_info!(self.room_id, "session started with {} phase(s)", phases);
        self.emit_phase_started(&inner.state);
        self.arm_deadline(&mut inner);
        Ok(self.commit(&mut inner))
    }

    /// Starts the plan previously attached with `load`.
    pub async fn start_staged(&self) -> EngineResult<TimerStatusSnapshot> {
        let plan = {
            let inner = self.inner.lock().await;
            inner.state.plan().cloned()
        };
        match plan {
            Some(plan) => self.start(plan).await,
            None => Err(EngineError::NoActiveSession {
                room_id: self.room_id.to_string(),
            }),
        }
    }

    pub async fn pause(&self) -> EngineResult<TimerStatusSnapshot> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.state.pause(now)?;
        self.disarm_deadline(&mut inner);
        let snapshot = inner.state.snapshot(now);
        room_info!(
            self.room_id,
            "paused with {}s remaining in phase",
            snapshot.remaining_secs
        );
        self.broadcaster.publish(EventKind::TimerPaused(snapshot));
        Ok(self.commit(&mut inner))
    }

    pub async fn resume(&self) -> EngineResult<TimerStatusSnapshot> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.state.resume(now)?;
        let snapshot = inner.state.snapshot(now);
        room_info!(
            self.room_id,
            "resumed; total paused {}s",
            snapshot.total_paused_secs
        );
        self.broadcaster.publish(EventKind::TimerResumed(snapshot));
        self.arm_deadline(&mut inner);
        Ok(self.commit(&mut inner))
    }

    pub async fn reset(&self) -> EngineResult<TimerStatusSnapshot> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.state.reset(now, Utc::now())?;
        room_info!(self.room_id, "reset to first phase");
        self.broadcaster
            .publish(EventKind::TimerReset(inner.state.snapshot(now)));
        self.emit_phase_started(&inner.state);
        self.arm_deadline(&mut inner);
        Ok(self.commit(&mut inner))
    }

    /// Idempotent. Cancels the pending deadline and closes every subscription.
    /// An ended session can still be `reset`.
    pub async fn end(&self) -> TimerStatusSnapshot {
        let mut inner = self.inner.lock().await;
        self.shut_down(&mut inner, false)
    }

    /// Ends the session and marks it retired, after which every command fails
    /// with `SessionNotFound`. Called by the registry when the room goes away.
    pub async fn retire(&self) -> TimerStatusSnapshot {
        let mut inner = self.inner.lock().await;
        self.shut_down(&mut inner, true)
    }

    /// Retires the session only if, under the room lock, it is still terminal
    /// and has been idle for at least `idle`. A session reset in the meantime
    /// is left alone.
    pub async fn retire_if_idle(&self, now: Instant, idle: Duration) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.state.idle_for(now, idle) {
            return false;
        }
        self.shut_down(&mut inner, true);
        true
    }

    /// Manually moves to the phase with `sequence` and re-arms its deadline.
    pub async fn set_phase(&self, sequence: u32) -> EngineResult<TimerStatusSnapshot> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if let Some(transition) = inner.state.jump_to(sequence, now)? {
            room_info!(self.room_id, "phase set manually to {}", sequence);
            self.after_manual_transition(&mut inner, transition, now);
        }
        Ok(self.commit(&mut inner))
    }

    /// Manually ends the current phase; on the last phase this completes the
    /// interview.
    pub async fn advance_phase(&self) -> EngineResult<TimerStatusSnapshot> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let transition = inner.state.skip(now)?;
        room_info!(self.room_id, "phase advanced manually");
        self.after_manual_transition(&mut inner, transition, now);
        Ok(self.commit(&mut inner))
    }

    pub async fn inject_context(
        &self,
        kind: ContextKind,
        context_type: &str,
        text: &str,
    ) -> EngineResult<InjectedContext> {
        let mut inner = self.inner.lock().await;
        let context = inner.state.inject(kind, context_type, text, Utc::now())?;
        room_info!(
            self.room_id,
            "{:?} context injected into phase {} ({} chars)",
            kind,
            context.phase_sequence,
            text.chars().count()
        );
        self.commit(&mut inner);
        Ok(context)
    }

    /// Attaches an observer. Done under the room lock so the `connected`
    /// snapshot and the first live event cannot straddle a transition.
    /// A retired room hands out a stream that ends right after `connected`.
    pub async fn subscribe(&self) -> Subscription {
        let inner = self.inner.lock().await;
        let status = inner.state.snapshot(Instant::now());
        let subscription = self.broadcaster.subscribe(status);
        if inner.state.is_retired() {
            self.broadcaster.close_all();
        }
        subscription
    }

    pub async fn publish_heartbeat(&self) {
        let inner = self.inner.lock().await;
        if inner.state.is_retired() {
            return;
        }
        let status = inner.state.snapshot(Instant::now());
        self.broadcaster.publish(EventKind::Heartbeat(status));
    }

    fn shut_down(&self, inner: &mut Inner, retire: bool) -> TimerStatusSnapshot {
        let now = Instant::now();
        self.disarm_deadline(inner);
        let changed = if retire {
            inner.state.retire(now)
        } else {
            inner.state.end(now)
        };
        if changed {
            room_info!(self.room_id, "session ended");
            self.broadcaster
                .publish(EventKind::SessionEnded(inner.state.snapshot(now)));
        }
        let closed = self.broadcaster.close_all();
        if closed > 0 {
            room_debug!(self.room_id, "closed {} subscription(s)", closed);
        }
        self.commit(inner)
    }

    /// Emits the manual transition, then re-arms or drops the deadline to
    /// match the new state.
    fn after_manual_transition(&self, inner: &mut Inner, transition: Transition, now: Instant) {
        self.emit_transition(inner, transition, now);
        if inner.state.status() == RunState::Running {
            self.arm_deadline(inner);
        } else {
            self.disarm_deadline(inner);
        }
    }

    fn commit(&self, inner: &mut Inner) -> TimerStatusSnapshot {
        inner.view_tx.send_replace(inner.state.clone());
        inner.state.snapshot(Instant::now())
    }

    fn disarm_deadline(&self, inner: &mut Inner) {
        if let Some(task) = inner.deadline.take() {
            task.stop();
        }
    }

    /// Replaces any scheduled deadline with one keyed to the current
    /// generation. A superseded task notices the generation change and exits.
    fn arm_deadline(&self, inner: &mut Inner) {
        self.disarm_deadline(inner);
        let Some(deadline) = inner.state.deadline() else {
            return;
        };
        let generation = inner.state.generation();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_deadlines(self.clone(), generation, cancel.clone()));
        room_debug!(
            self.room_id,
            "deadline armed in {:?} (generation {})",
            deadline.saturating_duration_since(Instant::now()),
            generation
        );
        inner.deadline = Some(DeadlineTask { cancel, handle });
    }

    fn emit_phase_started(&self, state: &TimerState) {
        if let Some(phase) = state.current_phase() {
            self.broadcaster
                .publish(EventKind::PhaseStarted(PhaseStartedPayload {
                    phase: PhaseSummary::of(state.phase_index(), phase),
                    instructions: phase.instructions.clone(),
                    status: state.snapshot(Instant::now()),
                }));
        }
    }

    fn emit_transition(&self, inner: &mut Inner, transition: Transition, now: Instant) {
        match transition {
            Transition::PhaseChanged { from, to } => {
                let Some(plan) = inner.state.plan().cloned() else {
                    return;
                };
                let (Some(previous), Some(current)) = (plan.get(from), plan.get(to)) else {
                    return;
                };
                room_info!(
                    self.room_id,
                    "phase {} -> {} (transition {})",
                    previous.sequence,
                    current.sequence,
                    inner.state.transitions()
                );
                self.broadcaster
                    .publish(EventKind::PhaseChanged(PhaseChangedPayload {
                        previous: PhaseSummary::of(from, previous),
                        current: PhaseSummary::of(to, current),
                        instructions: current.instructions.clone(),
                        transition_count: inner.state.transitions(),
                        status: inner.state.snapshot(now),
                    }));
            }
            Transition::Completed { total_transitions } => {
                let snapshot = inner.state.snapshot(now);
                let session_duration_secs = snapshot
                    .session_started_at
                    .map(|started| (Utc::now() - started).num_seconds())
                    .unwrap_or(0);
                room_info!(
                    self.room_id,
                    "interview completed after {} transition(s)",
                    total_transitions
                );
                self.broadcaster
                    .publish(EventKind::InterviewCompleted(CompletionPayload {
                        total_transitions,
                        total_phases: snapshot.total_phases,
                        session_duration_secs,
                    }));
            }
        }
        self.commit(inner);
    }
}

/// Sleeps until each phase boundary and advances the timer. Exits when the
/// session stops running or a command has re-armed a newer generation.
async fn run_deadlines(timer: SessionTimer, generation: u64, cancel: CancellationToken) {
    loop {
        let deadline = {
            let inner = timer.inner.lock().await;
            if inner.state.generation() != generation {
                return;
            }
            match inner.state.deadline() {
                Some(deadline) => deadline,
                None => return,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = time::sleep_until(deadline) => {}
        }

        let mut inner = timer.inner.lock().await;
        // A command may have won the lock first; it owns the schedule now.
        if cancel.is_cancelled() || inner.state.generation() != generation {
            return;
        }
        let now = Instant::now();
        if let Some(transition) = inner.state.advance(now) {
            timer.emit_transition(&mut inner, transition, now);
        }
        if inner.state.status() != RunState::Running {
            inner.deadline = None;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::descriptor;

    fn plan() -> Arc<PhasePlan> {
        Arc::new(PhasePlan::new(vec![descriptor(1, 900), descriptor(2, 1200)]).unwrap())
    }

    fn timer() -> SessionTimer {
        SessionTimer::new("room-1", EventBroadcaster::new("room-1", 64))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadlines_advance_phases_and_complete() {
        let timer = timer();
        let mut sub = timer.subscribe().await;
        timer.start(plan()).await.unwrap();

        let mut names = Vec::new();
        while let Some(event) = sub.recv().await {
            names.push(event.name());
            if event.name() == "interview_completed" {
                break;
            }
        }
        assert_eq!(
            names,
            vec!["connected", "phase_started", "phase_changed", "interview_completed"]
        );
        assert_eq!(timer.run_state(), RunState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_cancels_deadline_until_resume() {
        let timer = timer();
        timer.start(plan()).await.unwrap();

        time::advance(Duration::from_secs(100)).await;
        let paused = timer.pause().await.unwrap();
        assert_eq!(paused.remaining_secs, 800);

        time::advance(Duration::from_secs(5000)).await;
        settle().await;
        let status = timer.status();
        assert_eq!(status.state, RunState::Paused);
        assert_eq!(status.current_phase.map(|p| p.sequence), Some(1));
        assert_eq!(status.remaining_secs, 800);

        timer.resume().await.unwrap();
        time::advance(Duration::from_secs(800)).await;
        settle().await;
        assert_eq!(timer.status().current_phase.map(|p| p.sequence), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn status_does_not_wait_for_the_room_lock() {
        let timer = timer();
        timer.start(plan()).await.unwrap();
        let _guard = timer.inner.lock().await;
        assert_eq!(timer.status().state, RunState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn end_is_idempotent_and_closes_streams() {
        let timer = timer();
        timer.start(plan()).await.unwrap();
        let mut sub = timer.subscribe().await;

        assert_eq!(timer.end().await.state, RunState::Ended);
        assert_eq!(timer.end().await.state, RunState::Ended);

        let mut names = Vec::new();
        while let Some(event) = sub.recv().await {
            names.push(event.name());
        }
        assert_eq!(names, vec!["connected", "session_ended"]);

        time::advance(Duration::from_secs(3000)).await;
        settle().await;
        assert_eq!(timer.run_state(), RunState::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn start_staged_requires_a_loaded_plan() {
        let timer = timer();
        assert!(matches!(
            timer.start_staged().await,
            Err(EngineError::NoActiveSession { .. })
        ));
        timer.load(plan()).await.unwrap();
        assert_eq!(timer.run_state(), RunState::Idle);
        assert_eq!(timer.start_staged().await.unwrap().state, RunState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn retired_handle_cannot_revive_the_session() {
        let timer = timer();
        timer.start(plan()).await.unwrap();
        let stale = timer.clone();
        timer.retire().await;

        assert!(matches!(
            stale.reset().await,
            Err(EngineError::SessionNotFound { .. })
        ));
        assert!(matches!(
            stale.start(plan()).await,
            Err(EngineError::SessionNotFound { .. })
        ));
        assert!(stale.is_retired());
        assert_eq!(stale.run_state(), RunState::Ended);

        let mut late = stale.subscribe().await;
        assert_eq!(late.recv().await.unwrap().name(), "connected");
        assert!(late.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retire_if_idle_skips_a_session_reset_in_between() {
        let timer = timer();
        timer.start(Arc::new(PhasePlan::new(vec![descriptor(1, 10)]).unwrap())).await.unwrap();
        time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(timer.run_state(), RunState::Completed);

        time::advance(Duration::from_secs(60)).await;
        timer.reset().await.unwrap();
        assert!(!timer.retire_if_idle(Instant::now(), Duration::from_secs(60)).await);
        assert_eq!(timer.run_state(), RunState::Running);
        assert!(!timer.is_retired());
    }

    #[tokio::test(start_paused = true)]
    async fn set_phase_emits_a_change_and_rearms_the_deadline() {
        let timer = timer();
        let mut sub = timer.subscribe().await;
        timer.start(plan()).await.unwrap();

        time::advance(Duration::from_secs(100)).await;
        let snap = timer.set_phase(2).await.unwrap();
        assert_eq!(snap.current_phase.map(|p| p.sequence), Some(2));
        assert_eq!(snap.transitions_completed, 1);

        // The phase 1 deadline at 900s no longer applies.
        time::advance(Duration::from_secs(1199)).await;
        settle().await;
        assert_eq!(timer.run_state(), RunState::Running);
        time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(timer.run_state(), RunState::Completed);

        let mut names = Vec::new();
        while let Some(event) = sub.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["connected", "phase_started", "phase_changed", "interview_completed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn advance_phase_on_the_last_phase_completes() {
        let timer = timer();
        timer.start(plan()).await.unwrap();
        timer.advance_phase().await.unwrap();
        let done = timer.advance_phase().await.unwrap();
        assert_eq!(done.state, RunState::Completed);
        assert_eq!(done.transitions_completed, 1);

        time::advance(Duration::from_secs(5000)).await;
        settle().await;
        assert_eq!(timer.run_state(), RunState::Completed);
    }
}
