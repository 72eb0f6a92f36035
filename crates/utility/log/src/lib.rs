//! A simple logging facade for the Ember kernel.
//!
//! The kernel image installs a sink with [`set_global_logger`] once its output device is ready.
//! Until then, every record is silently dropped.

#![no_std]
#![warn(missing_docs, missing_debug_implementations)]
#![deny(unsafe_op_in_unsafe_fn)]

use core::fmt::{self, Arguments};
use core::sync::atomic::Ordering::Relaxed;
use core::sync::atomic::{AtomicPtr, AtomicU8};

/// A verbosity level associated with a [`Record`].
///
/// Levels are ordered from the most important to the most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Verbosity {
    Error,
    Warn,
    Info,
    Trace,
}

impl Verbosity {
    /// Returns the name of this level, as displayed by sinks.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Trace => "Trace",
        }
    }

    /// Returns the [`Verbosity`] whose discriminant is `n`, clamping to [`Verbosity::Trace`].
    const fn from_u8(n: u8) -> Self {
        match n {
            0 => Self::Error,
            1 => Self::Warn,
            2 => Self::Info,
            _ => Self::Trace,
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// A record that can be logged by the global logger.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// The verbosity level of this record.
    pub verbosity: Verbosity,
    /// The message.
    pub message: Arguments<'a>,
    /// The module from which the record originates.
    pub module: &'static str,
    /// The file from which the record originates.
    pub file: &'static str,
    /// The line within the file from which this record originates.
    pub line: u32,
}

/// Creates a [`Record`] for the current call-site.
#[macro_export]
macro_rules! record {
    ($verbosity:expr, $($args:tt)*) => {
        $crate::Record {
            verbosity: $verbosity,
            message: ::core::format_args!($($args)*),
            module: ::core::module_path!(),
            file: ::core::file!(),
            line: ::core::line!(),
        }
    };
}

/// The signature of the function that will be called when a [`Record`] needs to be logged.
pub type LoggerFn = fn(record: &Record);

/// The default logging function.
fn noop_logger(_record: &Record) {}

/// An atomic [`LoggerFn`] which is used to log messages.
static GLOBAL_LOGGER: AtomicPtr<()> = AtomicPtr::new(noop_logger as *mut ());

/// The most verbose level that reaches the global logger.
static MAX_VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Trace as u8);

/// Sets the global logging function which should be used when receiving [`Record`]s.
#[inline(always)]
pub fn set_global_logger(f: LoggerFn) {
    GLOBAL_LOGGER.store(f as *mut (), Relaxed);
}

/// Removes the global logger.
#[inline(always)]
pub fn remove_global_logger() {
    set_global_logger(noop_logger);
}

/// Loads the current global logging function.
#[inline(always)]
pub fn get_global_logger() -> LoggerFn {
    let p = GLOBAL_LOGGER.load(Relaxed);

    // SAFETY:
    //  We know by invariant of `GLOBAL_LOGGER` that it always contain a valid `LoggerFn` pointer.
    unsafe { core::mem::transmute::<*mut (), LoggerFn>(p) }
}

/// Sets the most verbose level that will be forwarded to the global logger.
#[inline(always)]
pub fn set_max_verbosity(verbosity: Verbosity) {
    MAX_VERBOSITY.store(verbosity as u8, Relaxed);
}

/// Returns the most verbose level that will be forwarded to the global logger.
#[inline(always)]
pub fn max_verbosity() -> Verbosity {
    Verbosity::from_u8(MAX_VERBOSITY.load(Relaxed))
}

/// Returns whether a record of the provided verbosity would reach the global logger.
#[inline(always)]
pub fn enabled(verbosity: Verbosity) -> bool {
    verbosity <= max_verbosity()
}

/// Forwards `record` to the global logger if its verbosity is enabled.
#[inline]
pub fn dispatch(record: &Record) {
    if enabled(record.verbosity) {
        get_global_logger()(record);
    }
}

/// Logs a message using the global logger.
#[macro_export]
macro_rules! log {
    ($verbosity:expr, $($args:tt)*) => {
        $crate::dispatch(&$crate::record!($verbosity, $($args)*))
    };
}

/// Logs a message with the [`Verbosity::Error`] level.
#[macro_export]
macro_rules! error {
    ($($args:tt)*) => {
        $crate::log!($crate::Verbosity::Error, $($args)*)
    };
}

/// Logs a message with the [`Verbosity::Warn`] level.
#[macro_export]
macro_rules! warn {
    ($($args:tt)*) => {
        $crate::log!($crate::Verbosity::Warn, $($args)*)
    };
}

/// Logs a message with the [`Verbosity::Info`] level.
#[macro_export]
macro_rules! info {
    ($($args:tt)*) => {
        $crate::log!($crate::Verbosity::Info, $($args)*)
    };
}

/// Logs a message with the [`Verbosity::Trace`] level.
#[macro_export]
macro_rules! trace {
    ($($args:tt)*) => {
        $crate::log!($crate::Verbosity::Trace, $($args)*)
    };
}
