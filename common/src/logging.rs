//! Thin wrappers over `tracing` so that members log through one facade.

pub use tracing;

/// Target of the events that report the symbolic effects of instructions.
/// They can be filtered on their own, e.g., `BINSYM_LOG=effects=trace`.
pub const EFFECTS_TARGET: &str = "effects";

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => ($crate::logging::tracing::error!($($arg)+))
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)+) => ($crate::logging::tracing::warn!($($arg)+))
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => ($crate::logging::tracing::info!($($arg)+))
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => ($crate::logging::tracing::debug!($($arg)+))
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)+) => ($crate::logging::tracing::trace!($($arg)+))
}

/// Logs a side effect (e.g., a new symbolic expression) under
/// [`EFFECTS_TARGET`].
#[macro_export]
macro_rules! log_effect {
    ($($arg:tt)+) => (
        $crate::logging::tracing::trace!(target: $crate::logging::EFFECTS_TARGET, $($arg)+)
    )
}
