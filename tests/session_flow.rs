use std::{sync::Arc, time::Duration};

use interview_engine::{
    broadcast::EventKind, ChannelSink, EngineSettings, Event, InterviewEngine, PhaseDescriptor,
    PhasePlan, PhaseType, RunState, SessionRegistry, SessionTimer, Subscription,
};
use tokio::{sync::mpsc, time};

fn phase(sequence: u32, duration_secs: i64) -> PhaseDescriptor {
    PhaseDescriptor {
        sequence,
        question_id: format!("question-{sequence}"),
        duration_secs,
        instructions: format!("Ask question {sequence}"),
        phase_type: PhaseType::Coding,
        question_text: None,
        knowledge_bank_id: None,
        tools: Vec::new(),
    }
}

fn plan(durations: &[i64]) -> Arc<PhasePlan> {
    let phases = durations
        .iter()
        .enumerate()
        .map(|(i, d)| phase(i as u32 + 1, *d))
        .collect();
    Arc::new(PhasePlan::new(phases).unwrap())
}

fn room(registry: &SessionRegistry, id: &str) -> SessionTimer {
    registry.get_or_create(id)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn drain(sub: &mut Subscription) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = sub.try_recv() {
        events.push(event);
    }
    events
}

fn names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

#[tokio::test(start_paused = true)]
async fn every_plan_emits_one_change_per_boundary_and_one_completion() {
    let registry = SessionRegistry::new(EngineSettings::default());
    let plans: [&[i64]; 4] = [&[60], &[900, 1200], &[1, 1, 1, 1, 1], &[30, 3600, 45]];

    for (n, durations) in plans.iter().enumerate() {
        let timer = room(&registry, &format!("room-{n}"));
        let mut sub = timer.subscribe().await;
        timer.start(plan(durations)).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            let done = event.name() == "interview_completed";
            events.push(event);
            if done {
                break;
            }
        }
        settle().await;
        assert!(sub.try_recv().is_none(), "nothing after completion");

        let changes: Vec<(u32, u32)> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::PhaseChanged(p) => Some((p.previous.sequence, p.current.sequence)),
                _ => None,
            })
            .collect();
        let expected: Vec<(u32, u32)> = (1..durations.len() as u32).map(|s| (s, s + 1)).collect();
        assert_eq!(changes, expected);

        let completions: Vec<u32> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::InterviewCompleted(c) => Some(c.total_transitions),
                _ => None,
            })
            .collect();
        assert_eq!(completions, vec![durations.len() as u32 - 1]);

        // Live events carry consecutive room sequence numbers.
        let seqs: Vec<u64> = events.iter().skip(1).map(|e| e.sequence).collect();
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1), "{seqs:?}");
        assert_eq!(timer.run_state(), RunState::Completed);
    }
}

#[tokio::test(start_paused = true)]
async fn two_phase_interview_with_a_pause() {
    let registry = SessionRegistry::new(EngineSettings::default());
    let timer = room(&registry, "interview");
    let mut sub = timer.subscribe().await;
    timer.start(plan(&[900, 1200])).await.unwrap();

    time::advance(Duration::from_secs(899)).await;
    settle().await;
    assert_eq!(names(&drain(&mut sub)), vec!["connected", "phase_started"]);

    time::advance(Duration::from_secs(1)).await;
    settle().await;
    let changed = drain(&mut sub);
    assert_eq!(names(&changed), vec!["phase_changed"]);
    assert_eq!(timer.status().current_phase.map(|p| p.sequence), Some(2));

    time::advance(Duration::from_secs(100)).await;
    let paused = timer.pause().await.unwrap();
    assert_eq!(paused.remaining_secs, 1100);

    time::advance(Duration::from_secs(100)).await;
    let resumed = timer.resume().await.unwrap();
    assert_eq!(resumed.remaining_secs, paused.remaining_secs);
    assert_eq!(resumed.elapsed_secs, paused.elapsed_secs);
    assert_eq!(resumed.total_paused_secs, 100);

    time::advance(Duration::from_secs(1099)).await;
    settle().await;
    assert_eq!(timer.status().remaining_secs, 1);
    assert_eq!(names(&drain(&mut sub)), vec!["timer_paused", "timer_resumed"]);

    time::advance(Duration::from_secs(1)).await;
    settle().await;
    let tail = drain(&mut sub);
    assert_eq!(names(&tail), vec!["interview_completed"]);
    match &tail[0].kind {
        EventKind::InterviewCompleted(c) => {
            assert_eq!(c.total_transitions, 1);
            assert_eq!(c.total_phases, 2);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn late_subscriber_gets_current_phase() {
    let registry = SessionRegistry::new(EngineSettings::default());
    let timer = room(&registry, "late");
    timer.start(plan(&[60, 120, 180])).await.unwrap();

    time::advance(Duration::from_secs(90)).await;
    settle().await;

    let mut sub = timer.subscribe().await;
    let first = sub.recv().await.unwrap();
    match first.kind {
        EventKind::Connected(status) => {
            assert_eq!(status.current_phase.map(|p| p.sequence), Some(2));
            assert_eq!(status.elapsed_secs, 30);
            assert_eq!(status.transitions_completed, 1);
        }
        other => panic!("expected connected, got {other:?}"),
    }
    assert!(sub.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn pause_racing_the_deadline_yields_one_consistent_outcome() {
    // Paused one second short of the boundary: the deadline never fires.
    let registry = SessionRegistry::new(EngineSettings::default());
    let first = room(&registry, "pause-first");
    first.start(plan(&[900, 1200])).await.unwrap();
    time::advance(Duration::from_secs(899)).await;
    let snap = first.pause().await.unwrap();
    time::advance(Duration::from_secs(600)).await;
    settle().await;
    let after = first.status();
    assert_eq!(after.state, RunState::Paused);
    assert_eq!(after.current_phase.map(|p| p.sequence), Some(1));
    assert_eq!(after.remaining_secs, 1);
    assert_eq!(after.remaining_secs, snap.remaining_secs);

    // Deadline wins: the boundary was processed before the pause.
    let second = room(&registry, "deadline-first");
    second.start(plan(&[900, 1200])).await.unwrap();
    time::advance(Duration::from_secs(900)).await;
    settle().await;
    let snap = second.pause().await.unwrap();
    assert_eq!(snap.current_phase.map(|p| p.sequence), Some(2));
    assert_eq!(snap.elapsed_secs, 0);

    // Genuinely concurrent: either outcome, never a mix.
    let third = room(&registry, "concurrent");
    let mut sub = third.subscribe().await;
    third.start(plan(&[900, 1200])).await.unwrap();
    time::advance(Duration::from_secs(900)).await;
    let racer = third.clone();
    let pause = tokio::spawn(async move { racer.pause().await });
    settle().await;
    pause.await.unwrap().unwrap();

    let status = third.status();
    assert_eq!(status.state, RunState::Paused);
    let phase = status.current_phase.clone().map(|p| p.sequence);
    match phase {
        Some(1) => assert_eq!((status.remaining_secs, status.transitions_completed), (0, 0)),
        Some(2) => assert_eq!((status.elapsed_secs, status.transitions_completed), (0, 1)),
        other => panic!("torn state: {other:?}"),
    }

    // Resuming always lands in phase 2 with exactly one change emitted.
    third.resume().await.unwrap();
    settle().await;
    assert_eq!(third.status().current_phase.map(|p| p.sequence), Some(2));
    let changes = drain(&mut sub)
        .iter()
        .filter(|e| e.name() == "phase_changed")
        .count();
    assert_eq!(changes, 1);
}

#[tokio::test(start_paused = true)]
async fn reset_rearms_a_completed_session() {
    let registry = SessionRegistry::new(EngineSettings::default());
    let timer = room(&registry, "again");
    timer.start(plan(&[10])).await.unwrap();
    time::advance(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(timer.run_state(), RunState::Completed);

    let snap = timer.reset().await.unwrap();
    assert_eq!(snap.state, RunState::Running);
    assert_eq!(snap.transitions_completed, 0);
    assert_eq!(snap.remaining_secs, 10);

    time::advance(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(timer.run_state(), RunState::Completed);
}

#[tokio::test(start_paused = true)]
async fn engine_streams_sse_frames_and_shuts_down_cleanly() {
    let engine = InterviewEngine::start(EngineSettings::default());
    let control = engine.control().clone();

    control
        .start_interview(interview_engine::control::StartInterviewRequest {
            room_id: "stream".into(),
            phases: vec![phase(1, 60), phase(2, 60)],
            auto_start: true,
            interview_type: Some("system_design".into()),
        })
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let delivery = control
        .open_stream("stream", ChannelSink::new(tx))
        .await
        .unwrap();

    let connected = rx.recv().await.unwrap();
    assert!(connected.starts_with("id: "));
    assert!(connected.contains("event: connected"));

    let next = rx.recv().await.unwrap();
    assert!(next.contains("event: heartbeat") || next.contains("event: phase_changed"));

    engine.shutdown().await;
    let outcome = delivery.join().await;
    assert_eq!(outcome, interview_engine::DeliveryOutcome::Closed);
}
