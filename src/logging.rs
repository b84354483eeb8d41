//! Read-path event logging.
//!
//! Events go through the `log` facade under their own target so
//! embedders can route or silence the read path independently of their
//! application logs. Each line is an operation name followed by
//! `key=value` context pairs.

pub(crate) const LOG_TARGET: &str = "kura::reader";

/// Emit one read-path event with structured context.
///
/// The first argument names a `log` level macro (`trace`, `debug`, ...),
/// the second is the operation being reported; any `key = value` pairs
/// that follow are appended to the line, rendered with `Debug`.
macro_rules! read_event {
    ($level:ident, $op:literal $(, $key:ident = $value:expr)* $(,)?) => {
        log::$level!(
            target: crate::logging::LOG_TARGET,
            concat!($op $(, " ", stringify!($key), "={:?}")*)
            $(, $value)*
        );
    };
}

pub(crate) use read_event;
