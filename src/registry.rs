use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use log::{debug, info};
use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    broadcast::EventBroadcaster,
    error::{EngineError, EngineResult},
    settings::EngineSettings,
    timer::{RunState, SessionTimer},
};

/// Coarse per-room view for operational inspection.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: String,
    pub state: RunState,
    pub current_sequence: Option<u32>,
    pub transitions_completed: u32,
    pub subscribers: usize,
}

/// Maps room identifiers to live session timers. Each timer carries its own
/// exclusion domain, so this map is only locked long enough to look up,
/// insert or remove an entry.
pub struct SessionRegistry {
    settings: EngineSettings,
    rooms: RwLock<HashMap<String, SessionTimer>>,
}

impl SessionRegistry {
    pub fn new(settings: EngineSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            rooms: RwLock::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionTimer>> {
        match self.rooms.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionTimer>> {
        match self.rooms.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns the room's timer, creating an idle one (with its broadcaster)
    /// if none exists. Never yields two timers for the same room. A retired
    /// entry still awaiting removal is replaced.
    pub fn get_or_create(&self, room_id: &str) -> SessionTimer {
        if let Some(timer) = self.get(room_id) {
            return timer;
        }
        let mut rooms = self.write();
        if let Some(timer) = rooms.get(room_id).filter(|t| !t.is_retired()) {
            return timer.clone();
        }
        info!("Creating session for room {room_id}");
        let broadcaster = EventBroadcaster::new(room_id, self.settings.subscriber_buffer);
        let timer = SessionTimer::new(room_id, broadcaster);
        rooms.insert(room_id.to_string(), timer.clone());
        timer
    }

    pub fn get(&self, room_id: &str) -> Option<SessionTimer> {
        self.read()
            .get(room_id)
            .filter(|timer| !timer.is_retired())
            .cloned()
    }

    pub fn require(&self, room_id: &str) -> EngineResult<SessionTimer> {
        self.get(room_id).ok_or_else(|| EngineError::SessionNotFound {
            room_id: room_id.to_string(),
        })
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.get(room_id).is_some()
    }

    /// Ends the session, closes its subscriptions and drops it. Unknown rooms
    /// are a no-op; returns whether anything was removed.
    pub async fn remove(&self, room_id: &str) -> bool {
        let removed = self.write().remove(room_id);
        match removed {
            Some(timer) => {
                timer.retire().await;
                info!("Removed session for room {room_id}");
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .read()
            .values()
            .map(|timer| {
                let status = timer.status();
                RoomSummary {
                    room_id: timer.room_id().to_string(),
                    state: status.state,
                    current_sequence: status.current_phase.map(|p| p.sequence),
                    transitions_completed: status.transitions_completed,
                    subscribers: timer.broadcaster().subscriber_count(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        summaries
    }

    pub fn timers(&self) -> Vec<SessionTimer> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Removes rooms that have been completed or ended for at least the
    /// configured idle timeout.
    ///
    /// Candidates are picked from the lock-free view, then confirmed and
    /// retired under each room's own lock, so a reset that lands first keeps
    /// its room.
    pub async fn reap_idle(&self, now: Instant) -> Vec<String> {
        let timeout = self.settings.completed_idle_timeout();
        let candidates: Vec<SessionTimer> = self
            .read()
            .values()
            .filter(|timer| timer.state().idle_for(now, timeout))
            .cloned()
            .collect();

        let mut reaped = Vec::with_capacity(candidates.len());
        for timer in candidates {
            if !timer.retire_if_idle(now, timeout).await {
                continue;
            }
            {
                let mut rooms = self.write();
                if rooms
                    .get(timer.room_id())
                    .is_some_and(|current| current.same_session(&timer))
                {
                    rooms.remove(timer.room_id());
                }
            }
            info!("Reaped idle session for room {}", timer.room_id());
            reaped.push(timer.room_id().to_string());
        }
        reaped
    }

    pub fn spawn_reaper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = self.settings.reaper_interval();
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = registry.reap_idle(Instant::now()).await;
                        if !reaped.is_empty() {
                            debug!("Reaper removed {} room(s)", reaped.len());
                        }
                    }
                    _ = cancel.cancelled() => {
                        debug!("Reaper shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Ends and removes every room.
    pub async fn shutdown(&self) {
        let timers: Vec<SessionTimer> = self.write().drain().map(|(_, t)| t).collect();
        for timer in timers {
            timer.retire().await;
        }
        info!("All sessions closed");
    }
}
