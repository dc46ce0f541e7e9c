//! RAOP audio-receiver RTP session engine.
//!
//! The audio-receiving half of an AirPlay-compatible RTP endpoint: socket
//! triad management, the receive/dispatch loop, a reorder/resend buffer
//! with an AES-CBC-decrypt-then-ALAC-decode pipeline, sender-clock-to-PTS
//! mapping, and a thread-safe mailbox for control-plane events (volume,
//! flush, metadata, cover art, remote-control identifiers, now-playing
//! progress). Out of scope: the signalling protocol that hands this crate
//! its keys and peer address, ALAC decoder internals, AES/ECDH key
//! derivation, the video/mirroring path, and the host audio sink itself —
//! callers provide one via [`sink::AudioSink`].
//!
//! [`session::Session`] is the entry point: construct with `Session::init`,
//! drive with `start_audio`/`stop`, and feed control-plane updates through
//! its `set_volume`/`set_metadata`/`set_coverart`/`remote_control_id`/
//! `set_progress`/`flush` methods from any thread.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod log;
pub mod mailbox;
pub mod rtp;
pub mod session;
pub mod sink;

pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use session::{LocalPorts, Session};
pub use sink::{AudioSink, PcmFrame};
