//! Error interface for this crate.
//!
//! Host-facing errors (configuration problems, malformed object files)
//! implement [`Error`], which adds a byte span and a help message
//! on top of [`std::error::Error`]. Guest faults are not errors in this sense;
//! see [`crate::sim::trap::Fault`].

use std::borrow::Cow;
use std::ops::Range;

/// The byte range of the source an error refers to.
pub type ErrSpan = Range<usize>;

/// Unified error interface for all errors in this crate.
pub trait Error: std::error::Error {
    /// The range of source bytes this error occurred at, if it refers to source text.
    fn span(&self) -> Option<ErrSpan> {
        None
    }

    /// A help message explaining how to fix the error.
    fn help(&self) -> Option<Cow<str>>;
}

/// Renders an error with its help message (if any) on a second line.
///
/// ```
/// use hawk_emu::err::report;
/// use hawk_emu::sim::ConfigErr;
///
/// let msg = report(&ConfigErr::BadRecycle(0));
/// assert!(msg.starts_with("invalid cycle interval 0"));
/// assert!(msg.contains("help:"));
/// ```
pub fn report(err: &impl Error) -> String {
    match err.help() {
        Some(help) => format!("{err}\n  help: {help}"),
        None => err.to_string(),
    }
}
