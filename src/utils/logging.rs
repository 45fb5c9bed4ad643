//! Room-scoped logging macros gated by a module-level `ENABLE_LOGS` flag.
//!
//! Usage:
//! ```ignore
//! // In your module, define the flag first:
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{room_info, room_warn};
//!
//! room_info!(room_id, "phase {} started", sequence);
//! ```
//!
//! Every line is prefixed with `[room <id>]` so interleaved output from
//! concurrent rooms stays attributable.

/// Info-level log for one room. Requires `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! room_info {
    ($room:expr, $($arg:tt)+) => {
        if ENABLE_LOGS {
            log::info!("[room {}] {}", $room, format_args!($($arg)+));
        }
    };
}

#[macro_export]
macro_rules! room_warn {
    ($room:expr, $($arg:tt)+) => {
        if ENABLE_LOGS {
            log::warn!("[room {}] {}", $room, format_args!($($arg)+));
        }
    };
}

#[macro_export]
macro_rules! room_error {
    ($room:expr, $($arg:tt)+) => {
        if ENABLE_LOGS {
            log::error!("[room {}] {}", $room, format_args!($($arg)+));
        }
    };
}

/// Debug-level; used for per-event chatter such as publish and subscribe.
#[macro_export]
macro_rules! room_debug {
    ($room:expr, $($arg:tt)+) => {
        if ENABLE_LOGS {
            log::debug!("[room {}] {}", $room, format_args!($($arg)+));
        }
    };
}

/// Initialise `env_logger` from `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
