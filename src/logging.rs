//! Logging macros.
//!
//! Thin wrappers that format a message and forward it to `tracing`, so call
//! sites read the same across the crate and the binary decides the filter.

#[doc(hidden)]
pub fn log_info_impl(msg: &str) {
    tracing::info!(target: "feedsync", "{}", msg);
}

#[doc(hidden)]
pub fn log_error_impl(msg: &str) {
    tracing::error!(target: "feedsync", "{}", msg);
}

#[doc(hidden)]
pub fn log_warn_impl(msg: &str) {
    tracing::warn!(target: "feedsync", "{}", msg);
}

#[doc(hidden)]
pub fn log_debug_impl(msg: &str) {
    tracing::debug!(target: "feedsync", "{}", msg);
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}
