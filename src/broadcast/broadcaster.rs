use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use uuid::Uuid;

use crate::timer::TimerStatusSnapshot;
use crate::{room_debug, room_error};

use super::{
    event::{Event, EventKind},
    subscription::{SubscriberQueue, SubscriberStats, Subscription},
};

const ENABLE_LOGS: bool = true;

struct Subscribers {
    queues: HashMap<Uuid, Arc<SubscriberQueue>>,
    /// Sequence number of the last published event.
    last_sequence: u64,
}

/// Per-room fan-out. `publish` only enqueues, so it is safe to call from
/// inside the timer's critical section.
pub struct EventBroadcaster {
    room_id: String,
    buffer: usize,
    inner: Mutex<Subscribers>,
}

impl EventBroadcaster {
    pub fn new(room_id: impl Into<String>, buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            room_id: room_id.into(),
            buffer,
            inner: Mutex::new(Subscribers {
                queues: HashMap::new(),
                last_sequence: 0,
            }),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stamps the next room sequence number on the event and enqueues it for
    /// every current subscriber. Returns the assigned sequence.
    pub fn publish(&self, kind: EventKind) -> u64 {
        let mut inner = self.lock();
        inner.last_sequence += 1;
        let event = Event::new(self.room_id.clone(), inner.last_sequence, kind);

        for queue in inner.queues.values() {
            if let Some(overflow) = queue.push(event.clone()) {
                room_error!(self.room_id, "{overflow}; subscriber marked degraded");
            }
        }
        room_debug!(
            self.room_id,
            "published {} #{} to {} subscriber(s)",
            event.name(),
            event.sequence,
            inner.queues.len()
        );
        event.sequence
    }

    /// Attaches a new observer and queues a `connected` event carrying
    /// `status` as its first item.
    pub fn subscribe(self: &Arc<Self>, status: TimerStatusSnapshot) -> Subscription {
        let queue = Arc::new(SubscriberQueue::new(self.room_id.clone(), self.buffer));
        {
            let mut inner = self.lock();
            let connected = Event::new(
                self.room_id.clone(),
                inner.last_sequence,
                EventKind::Connected(status),
            );
            queue.push(connected);
            inner.queues.insert(queue.id(), queue.clone());
        }
        room_debug!(self.room_id, "subscriber {} attached", queue.id());
        Subscription::new(queue, self.room_id.clone(), Arc::downgrade(self))
    }

    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.lock().queues.remove(&id);
        match removed {
            Some(queue) => {
                queue.close();
                room_debug!(self.room_id, "subscriber {} detached", id);
                true
            }
            None => false,
        }
    }

    /// Closes every current subscription. New observers may still attach.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.lock().queues.drain().map(|(_, q)| q).collect();
        for queue in &drained {
            queue.close();
        }
        drained.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().queues.len()
    }

    pub fn last_sequence(&self) -> u64 {
        self.lock().last_sequence
    }

    pub fn subscriber_stats(&self) -> Vec<SubscriberStats> {
        self.lock().queues.values().map(|q| q.stats()).collect()
    }
}
