//! Structured log helpers for merge events.

/// Single logging target for the merge engine.
pub(crate) const LOG_TARGET: &str = "tsqe_ooo";

/// Logs `event=<name> <message>` under [`LOG_TARGET`].
macro_rules! storage_log {
    ($level:expr, $event:expr, $fmt:expr $(, $args:expr)* $(,)?) => {{
        if log::log_enabled!(target: crate::storage::logging::LOG_TARGET, $level) {
            log::log!(
                target: crate::storage::logging::LOG_TARGET,
                $level,
                "event={} {}",
                $event,
                format_args!($fmt $(, $args)*)
            );
        }
    }};
}

pub(crate) use storage_log;
