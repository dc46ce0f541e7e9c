//! Logger capability threaded through the session, so that every operation
//! can report diagnostics through a caller-supplied sink rather than a
//! fixed global logging backend.
//!
//! The engine never picks a global logging backend; the caller supplies one
//! at [`crate::Session::init`](crate::session::Session::init) time, the same
//! way it supplies the [`crate::sink::AudioSink`] capability.

/// Severity of a log line emitted by the session engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logging capability the session engine calls into.
///
/// Implementors may filter by level, forward to `tracing`/`log`, or simply
/// discard. The engine itself never depends on a global logging backend.
pub trait SessionLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// A logger that discards everything. Useful for tests and embedders that
/// don't want any diagnostic output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl SessionLogger for NullLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// A logger that writes to stderr, prefixed with its level.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrLogger;

impl SessionLogger for StderrLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let tag = match level {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        eprintln!("[raop-rtp-session] {tag}: {message}");
    }
}
