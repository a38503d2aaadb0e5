//! Per-module switch for the gate's own diagnostic lines.
//!
//! The engine, the chat command handler and the cache sweeper each declare a
//! private `ENABLE_LOGS` const and log through `log_info!`, `log_warn!` and
//! `log_error!`. When a module's const is false its lines are compiled out and
//! the format arguments are never evaluated. Records still go through the `log`
//! facade, so `RUST_LOG` and [`crate::init_logging`] filter them as usual.

#[doc(hidden)]
#[macro_export]
macro_rules! gated_log {
    ($level:expr, $($arg:tt)+) => {
        if ENABLE_LOGS {
            log::log!($level, $($arg)+);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => { $crate::gated_log!(log::Level::Info, $($arg)+) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)+) => { $crate::gated_log!(log::Level::Warn, $($arg)+) };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => { $crate::gated_log!(log::Level::Error, $($arg)+) };
}
