mod broadcaster;
mod event;
pub mod heartbeat;
mod subscription;

pub use broadcaster::EventBroadcaster;
pub use event::{
    CompletionPayload, ErrorPayload, Event, EventKind, PhaseChangedPayload, PhaseStartedPayload,
};
pub use heartbeat::HeartbeatService;
pub use subscription::{
    spawn_delivery, ChannelSink, DeliveryHandle, DeliveryOutcome, EventSink, SubscriberStats,
    Subscription,
};
