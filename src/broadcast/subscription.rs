use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use tokio::{
    sync::{mpsc, Notify},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::EngineError;
use crate::{room_error, room_info, room_warn};

use super::{
    event::{ErrorPayload, Event, EventKind},
    EventBroadcaster,
};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberStats {
    pub id: Uuid,
    pub queued: usize,
    pub delivered: u64,
    pub dropped_heartbeats: u64,
    pub lost_events: u64,
    pub degraded: bool,
}

struct QueueInner {
    events: VecDeque<Event>,
    closed: bool,
    degraded: bool,
    delivered: u64,
    dropped_heartbeats: u64,
    lost_events: u64,
    /// Non-heartbeat events evicted since the observer last drained a notice,
    /// reported together ahead of the next queued event.
    unreported: Vec<(u64, &'static str)>,
}

impl QueueInner {
    fn take_notice(&mut self, room_id: &str, subscriber: Uuid) -> Option<Event> {
        if self.unreported.is_empty() {
            return None;
        }
        let lost = std::mem::take(&mut self.unreported);
        let names: Vec<String> = lost
            .iter()
            .map(|(seq, name)| format!("{name} #{seq}"))
            .collect();
        let payload = ErrorPayload {
            code: "delivery_overflow".to_string(),
            message: format!(
                "subscriber {subscriber} lost {} event(s) to overflow: {}",
                lost.len(),
                names.join(", ")
            ),
            lost_sequences: lost.iter().map(|(seq, _)| *seq).collect(),
        };
        Some(Event::new(room_id, lost[0].0, EventKind::Error(payload)))
    }
}

/// Bounded per-observer buffer. Producers never wait on it.
pub(crate) struct SubscriberQueue {
    id: Uuid,
    room_id: String,
    capacity: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl SubscriberQueue {
    pub(crate) fn new(room_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id: room_id.into(),
            capacity: capacity.max(2),
            inner: Mutex::new(QueueInner {
                events: VecDeque::with_capacity(capacity),
                closed: false,
                degraded: false,
                delivered: 0,
                dropped_heartbeats: 0,
                lost_events: 0,
                unreported: Vec::new(),
            }),
            notify: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueue, evicting the oldest heartbeat (or failing that, the oldest
    /// event) when full. Losing a non-heartbeat event degrades the observer
    /// and is returned as an overflow error for the caller to report.
    pub(crate) fn push(&self, event: Event) -> Option<EngineError> {
        let mut overflow = None;
        {
            let mut inner = self.lock();
            if inner.closed {
                return None;
            }
            if inner.events.len() >= self.capacity {
                let evict_at = inner
                    .events
                    .iter()
                    .position(|e| e.kind.is_heartbeat())
                    .unwrap_or(0);
                if let Some(evicted) = inner.events.remove(evict_at) {
                    if evicted.kind.is_heartbeat() {
                        inner.dropped_heartbeats += 1;
                    } else {
                        inner.lost_events += 1;
                        inner.degraded = true;
                        let err = EngineError::DeliveryOverflow {
                            room_id: self.room_id.clone(),
                            subscriber_id: self.id.to_string(),
                            event: evicted.name().to_string(),
                        };
                        inner.unreported.push((evicted.sequence, evicted.name()));
                        overflow = Some(err);
                    }
                }
            }
            inner.events.push_back(event);
        }
        self.notify.notify_one();
        overflow
    }

    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn stats(&self) -> SubscriberStats {
        let inner = self.lock();
        SubscriberStats {
            id: self.id,
            queued: inner.events.len(),
            delivered: inner.delivered,
            dropped_heartbeats: inner.dropped_heartbeats,
            lost_events: inner.lost_events,
            degraded: inner.degraded,
        }
    }

    /// Waits for the next event; `None` once closed and drained.
    pub(crate) async fn recv(&self) -> Option<Event> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(notice) = inner.take_notice(&self.room_id, self.id) {
                    return Some(notice);
                }
                if let Some(event) = inner.events.pop_front() {
                    inner.delivered += 1;
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

/// One observer's attachment to a room. Dropping it unsubscribes.
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
    room_id: String,
    broadcaster: Weak<EventBroadcaster>,
}

impl Subscription {
    pub(crate) fn new(
        queue: Arc<SubscriberQueue>,
        room_id: String,
        broadcaster: Weak<EventBroadcaster>,
    ) -> Self {
        Self {
            queue,
            room_id,
            broadcaster,
        }
    }

    pub fn id(&self) -> Uuid {
        self.queue.id()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn stats(&self) -> SubscriberStats {
        self.queue.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.queue.recv().await
    }

    /// Non-blocking poll used by tests and transports that batch.
    pub fn try_recv(&mut self) -> Option<Event> {
        let mut inner = self.queue.lock();
        if let Some(notice) = inner.take_notice(&self.queue.room_id, self.queue.id) {
            return Some(notice);
        }
        let event = inner.events.pop_front();
        if event.is_some() {
            inner.delivered += 1;
        }
        event
    }

    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.queue.id());
        }
    }
}

/// Transport-facing end of a delivery path.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: &Event) -> Result<()>;
}

/// Pushes SSE frames into a bounded channel owned by a transport.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: &Event) -> Result<()> {
        let frame = event.to_sse()?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| anyhow!("observer disconnected"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The room closed the subscription (session ended or removed).
    Closed,
    Cancelled,
    SinkFailed,
    TimedOut,
}

pub struct DeliveryHandle {
    cancel: CancellationToken,
    handle: JoinHandle<DeliveryOutcome>,
}

impl DeliveryHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> DeliveryOutcome {
        self.handle.await.unwrap_or(DeliveryOutcome::Cancelled)
    }
}

/// Drives one subscription into its sink on a dedicated task. A sink write
/// that exceeds `write_timeout` is treated as a dead observer.
pub fn spawn_delivery<S>(
    mut subscription: Subscription,
    mut sink: S,
    write_timeout: Duration,
) -> DeliveryHandle
where
    S: EventSink + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        let room_id = subscription.room_id().to_string();
        let id = subscription.id();
        let outcome = loop {
            tokio::select! {
                _ = token.cancelled() => break DeliveryOutcome::Cancelled,
                next = subscription.recv() => {
                    let Some(event) = next else {
                        break DeliveryOutcome::Closed;
                    };
                    match time::timeout(write_timeout, sink.send(&event)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            room_warn!(room_id, "subscriber {} sink failed: {err:#}", id);
                            break DeliveryOutcome::SinkFailed;
                        }
                        Err(_) => {
                            room_error!(
                                room_id,
                                "subscriber {} write timed out after {:?}; dropping",
                                id,
                                write_timeout
                            );
                            break DeliveryOutcome::TimedOut;
                        }
                    }
                }
            }
        };
        room_info!(room_id, "delivery for subscriber {} finished: {:?}", id, outcome);
        outcome
    });

    DeliveryHandle { cancel, handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(seq: u64) -> Event {
        Event::new(
            "room",
            seq,
            EventKind::Heartbeat(crate::timer::TimerState::new("room").snapshot(time::Instant::now())),
        )
    }

    fn transition(seq: u64) -> Event {
        Event::new(
            "room",
            seq,
            EventKind::Error(ErrorPayload::new("x", format!("event {seq}"))),
        )
    }

    #[tokio::test]
    async fn full_queue_drops_heartbeats_first() {
        let queue = SubscriberQueue::new("room", 3);
        assert!(queue.push(transition(1)).is_none());
        assert!(queue.push(heartbeat(2)).is_none());
        assert!(queue.push(transition(3)).is_none());
        assert!(queue.push(transition(4)).is_none());

        let stats = queue.stats();
        assert_eq!(stats.dropped_heartbeats, 1);
        assert!(!stats.degraded);

        let seqs: Vec<u64> = [
            queue.recv().await.unwrap(),
            queue.recv().await.unwrap(),
            queue.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.sequence)
        .collect();
        assert_eq!(seqs, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn losing_a_transition_degrades_and_reports() {
        let queue = SubscriberQueue::new("room", 2);
        queue.push(transition(1));
        queue.push(transition(2));
        let err = queue.push(transition(3)).expect("overflow reported");
        assert_eq!(err.code(), "delivery_overflow");
        assert!(queue.push(transition(4)).is_some());
        assert!(queue.stats().degraded);
        assert_eq!(queue.stats().lost_events, 2);

        // Both losses arrive in a single notice ahead of the survivors.
        let notice = queue.recv().await.unwrap();
        assert_eq!(notice.sequence, 1);
        match &notice.kind {
            EventKind::Error(payload) => {
                assert_eq!(payload.code, "delivery_overflow");
                assert_eq!(payload.lost_sequences, vec![1, 2]);
                assert!(payload.message.contains("lost 2 event(s)"));
            }
            other => panic!("expected an error notice, got {other:?}"),
        }
        assert_eq!(queue.recv().await.unwrap().sequence, 3);
        assert_eq!(queue.recv().await.unwrap().sequence, 4);

        // Reported once; the next loss starts a fresh notice.
        queue.push(transition(5));
        queue.push(transition(6));
        queue.push(transition(7));
        match queue.recv().await.unwrap().kind {
            EventKind::Error(payload) => assert_eq!(payload.lost_sequences, vec![5]),
            other => panic!("expected an error notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_queue_drains_then_ends() {
        let queue = SubscriberQueue::new("room", 4);
        queue.push(transition(1));
        queue.close();
        assert!(queue.push(transition(2)).is_none());
        assert_eq!(queue.recv().await.map(|e| e.sequence), Some(1));
        assert!(queue.recv().await.is_none());
    }

    struct StalledSink;

    #[async_trait]
    impl EventSink for StalledSink {
        async fn send(&mut self, _event: &Event) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_observer_is_reclaimed_after_timeout() {
        let queue = Arc::new(SubscriberQueue::new("room", 4));
        let sub = Subscription::new(queue.clone(), "room".into(), Weak::new());
        queue.push(transition(1));

        let delivery = spawn_delivery(sub, StalledSink, Duration::from_secs(10));
        assert_eq!(delivery.join().await, DeliveryOutcome::TimedOut);
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn channel_sink_forwards_sse_frames_until_receiver_drops() {
        let queue = Arc::new(SubscriberQueue::new("room", 4));
        let sub = Subscription::new(queue.clone(), "room".into(), Weak::new());
        let (tx, mut rx) = mpsc::channel(4);
        let delivery = spawn_delivery(sub, ChannelSink::new(tx), Duration::from_secs(5));

        queue.push(transition(1));
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("event: error"));

        drop(rx);
        queue.push(transition(2));
        assert_eq!(delivery.join().await, DeliveryOutcome::SinkFailed);
    }
}
