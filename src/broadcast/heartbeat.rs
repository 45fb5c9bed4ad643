use std::{sync::Arc, time::Duration};

use log::{debug, info};
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::registry::SessionRegistry;

/// Periodic liveness signal for every room with at least one observer,
/// independent of phase activity.
pub struct HeartbeatService {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatService {
    pub fn spawn(registry: Arc<SessionRegistry>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; observers already get `connected`.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut beats = 0usize;
                        for timer in registry.timers() {
                            if timer.broadcaster().subscriber_count() == 0 {
                                continue;
                            }
                            timer.publish_heartbeat().await;
                            beats += 1;
                        }
                        debug!("Heartbeat sent to {beats} room(s)");
                    }
                    _ = token.cancelled() => {
                        info!("Heartbeat service shutting down");
                        break;
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
