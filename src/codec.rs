//! ALAC payload decode, wrapped behind a small internal trait.
//!
//! ALAC decoder internals are explicitly out of scope for this crate
//! (`spec.md` §1); this module only adapts the external `alac` crate to the
//! shape the reorder buffer needs, the same way the teacher's own codec
//! modules (`bass-rtp/src/codec/{flac,g711,g722}.rs`) wrap an external/FFI
//! codec behind a per-format adapter instead of reimplementing it.

/// Decodes one ALAC packet into interleaved 16-bit signed PCM.
pub trait AlacDecoder: Send {
    /// Decode `packet` (one ALAC frame, as carried in an RTP audio payload)
    /// into interleaved 16-bit PCM samples. Returns `None` on a malformed or
    /// undecodable frame — the caller drops the packet per `spec.md` §4.2's
    /// "decryption failure, decode failure ... cause the packet to be
    /// dropped silently" policy.
    fn decode(&mut self, packet: &[u8]) -> Option<Vec<i16>>;
}

/// Magic-cookie-derived ALAC stream parameters for 44100 Hz stereo, matching
/// the format AirPlay audio sessions negotiate before RTP starts flowing.
#[derive(Debug, Clone, Copy)]
pub struct AlacStreamInfo {
    pub frame_length: u32,
    pub bit_depth: u8,
    pub channels: u8,
    pub sample_rate: u32,
}

impl Default for AlacStreamInfo {
    fn default() -> Self {
        Self {
            frame_length: 352,
            bit_depth: 16,
            channels: 2,
            sample_rate: 44_100,
        }
    }
}

/// [`AlacDecoder`] backed by the `alac` crate's pure-Rust decoder.
pub struct AlacCodec {
    decoder: alac::Decoder,
    channels: usize,
    scratch: Vec<i32>,
}

impl AlacCodec {
    pub fn new(info: AlacStreamInfo) -> Self {
        let stream_info = alac::StreamInfo::new(
            info.frame_length,
            0,
            info.bit_depth,
            info.channels,
            info.sample_rate,
        );
        let max_samples = info.frame_length as usize * info.channels as usize;
        Self {
            decoder: alac::Decoder::new(stream_info),
            channels: info.channels as usize,
            scratch: vec![0i32; max_samples],
        }
    }
}

impl AlacDecoder for AlacCodec {
    fn decode(&mut self, packet: &[u8]) -> Option<Vec<i16>> {
        let written = self.decoder.decode_packet(packet, &mut self.scratch, self.channels).ok()?;
        let mut out = Vec::with_capacity(written);
        for &sample in &self.scratch[..written] {
            out.push(sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
        }
        Some(out)
    }
}
