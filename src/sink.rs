//! The callback contract through which decoded frames and control events
//! reach the host, modeled as a capability object with default no-op
//! methods standing in for a struct of nullable function pointers.

/// One decoded, presentation-timestamped PCM frame handed to
/// [`AudioSink::audio_process`].
#[derive(Debug, Clone)]
pub struct PcmFrame<'a> {
    /// Microseconds since the Unix epoch; `0` if no clock sync has been
    /// received yet.
    pub pts: i64,
    /// Decoded interleaved 16-bit PCM, as raw bytes. Byte order is left to
    /// whatever convention the host and its codec already share.
    pub data: &'a [u8],
}

impl<'a> PcmFrame<'a> {
    pub fn data_len(&self) -> usize {
        self.data.len()
    }
}

/// The host audio sink. `audio_init`/`audio_process`/`audio_destroy` are
/// required; every other method is an optional hook with a no-op default.
///
/// `Data` is the sink's own per-session state, returned from `audio_init`
/// and threaded back into every other call by mutable reference instead of
/// as an untyped pointer.
pub trait AudioSink: Send {
    type Data;

    /// Allocate sink-side state once per session, before the worker loop
    /// starts.
    fn audio_init(&mut self) -> Self::Data;

    /// Deliver one decoded PCM frame. Runs on the worker thread.
    fn audio_process(&mut self, data: &mut Self::Data, frame: PcmFrame<'_>);

    /// Release sink-side state once per session, after the worker loop
    /// exits.
    fn audio_destroy(&mut self, data: Self::Data);

    /// Sink-side flush hook; called after the reorder buffer has been
    /// flushed.
    fn audio_flush(&mut self, _data: &mut Self::Data) {}

    /// `volume_db` is already clamped to `[-144.0, 0.0]`.
    fn audio_set_volume(&mut self, _data: &mut Self::Data, _volume_db: f32) {}

    fn audio_set_metadata(&mut self, _data: &mut Self::Data, _bytes: &[u8]) {}

    fn audio_set_coverart(&mut self, _data: &mut Self::Data, _bytes: &[u8]) {}

    fn audio_set_progress(&mut self, _data: &mut Self::Data, _start: u32, _curr: u32, _end: u32) {}

    /// Not threaded through `Data` — called with session-level identity
    /// only.
    fn audio_remote_control_id(&mut self, _dacp_id: &str, _active_remote_header: &str) {}
}
