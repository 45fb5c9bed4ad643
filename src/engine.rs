use std::sync::Arc;

use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    broadcast::HeartbeatService,
    control::{ControlSurface, SignalingGateway},
    registry::SessionRegistry,
    settings::{EngineSettings, SettingsStore},
};

/// Owns the registry and its background tasks (heartbeat, idle reaper).
/// Must be created inside a tokio runtime.
pub struct InterviewEngine {
    registry: Arc<SessionRegistry>,
    control: ControlSurface,
    heartbeat: HeartbeatService,
    reaper: JoinHandle<()>,
    cancel: CancellationToken,
}

impl InterviewEngine {
    pub fn start(settings: EngineSettings) -> Self {
        let registry = SessionRegistry::new(settings.clone());
        let cancel = CancellationToken::new();
        let heartbeat = HeartbeatService::spawn(registry.clone(), settings.heartbeat_interval());
        let reaper = registry.spawn_reaper(cancel.clone());
        info!(
            "Interview engine started (heartbeat {}s, idle timeout {}s)",
            settings.heartbeat_interval().as_secs(),
            settings.completed_idle_timeout_secs
        );

        Self {
            control: ControlSurface::new(registry.clone()),
            registry,
            heartbeat,
            reaper,
            cancel,
        }
    }

    /// Starts with the store's current settings.
    pub fn from_store(store: &SettingsStore) -> Self {
        Self::start(store.get())
    }

    pub fn with_signaling(mut self, gateway: Arc<dyn SignalingGateway>) -> Self {
        self.control = self.control.with_signaling(gateway);
        self
    }

    pub fn control(&self) -> &ControlSurface {
        &self.control
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stops background tasks, then ends every session.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.heartbeat.stop().await;
        let _ = self.reaper.await;
        self.registry.shutdown().await;
        info!("Interview engine stopped");
    }
}
