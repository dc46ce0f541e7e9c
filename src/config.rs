//! Session tunables as a `Default`-implementing plain struct rather than a
//! builder.

/// Tunable knobs for a [`crate::session::Session`].
///
/// Ports, crypto material and peer address are passed as explicit arguments
/// to `Session::init`/`start_audio`; this struct only covers values left as
/// an implementation choice.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Reorder buffer capacity in slots. Must be a power of two.
    pub buffer_capacity: usize,
    /// How many slots ahead of the cursor `handle_resends` will scan per
    /// drain. Bounded to at most half the buffer capacity.
    pub resend_horizon: usize,
    /// `select()` timeout for the worker loop's socket poll.
    pub poll_interval: std::time::Duration,
    /// Sample rate (Hz) used for RTP-timestamp-to-microsecond PTS arithmetic.
    pub sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 512,
            resend_horizon: 16,
            poll_interval: std::time::Duration::from_millis(5),
            sample_rate: 44_100,
        }
    }
}
