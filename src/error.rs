//! Error kinds surfaced by the session engine's fatal (non-per-packet) paths.
//!
//! Per-packet failures (malformed RTP header, decrypt/decode failure) never
//! construct a [`SessionError`] — they are logged through [`crate::log::SessionLogger`]
//! and the packet is dropped, per the session's best-effort streaming contract.

use thiserror::Error;

/// Fatal or caller-visible error from the session engine.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed remote address or a required argument was null/empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Socket allocation or another OS resource request failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Malformed RTP header, or decrypt/decode failure, at a boundary that
    /// cannot silently drop the packet (currently unused internally — kept
    /// for API completeness with `spec.md` §7's error kind enumeration).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// A `recvfrom`/`sendto` call failed.
    #[error("io error: {0}")]
    TransientIo(#[from] std::io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
