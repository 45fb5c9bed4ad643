pub mod controller;
pub mod state;

pub use controller::SessionTimer;
pub use state::{ContextKind, InjectedContext, RunState, TimerState, TimerStatusSnapshot, Transition};
