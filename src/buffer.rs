//! Fixed-capacity reorder buffer keyed by 16-bit RTP sequence number.
//!
//! This supersedes the teacher's `input/jitter.rs::JitterBuffer`, which
//! reorders by insertion into a `VecDeque` and outputs a continuous
//! resampled float stream — a shape built for a soundcard pull callback.
//! `spec.md` §3 instead calls for a slot array indexed by `seq mod
//! capacity` with overwrite semantics and an explicit resend-gap query, so
//! the slot array comes from the spec's own data model; the wrap-aware
//! sequence arithmetic (`crate::rtp::sequence_diff`) and the
//! received/dropped/lost counters are carried over from the teacher's
//! `JitterStats` in spirit.

use std::sync::Arc;

use crate::log::SessionLogger;
use crate::rtp::{sequence_diff, RtpHeader};

/// One decoded, in-order audio frame handed back by [`ReorderBuffer::dequeue`].
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub seqnum: u16,
    pub rtp_timestamp: u32,
    pub payload: Vec<u8>,
}

/// Decrypts and decodes one packet's payload. Kept as a trait so the buffer
/// itself stays free of AES/ALAC specifics and is unit-testable without
/// real crypto or codec state.
pub trait PacketPipeline: Send {
    /// `payload` is the RTP payload (post 12-byte header). Implementations
    /// may mutate it in place (e.g. in-place decryption) before decoding.
    /// Returns `None` on decrypt or decode failure.
    fn process(&mut self, payload: &mut [u8]) -> Option<Vec<u8>>;
}

/// Production [`PacketPipeline`]: AES-128-CBC decrypt, then ALAC decode.
pub struct CryptoAlacPipeline {
    key: [u8; 16],
    iv: [u8; 16],
    decoder: Box<dyn crate::codec::AlacDecoder>,
}

impl CryptoAlacPipeline {
    pub fn new(key: [u8; 16], iv: [u8; 16], decoder: Box<dyn crate::codec::AlacDecoder>) -> Self {
        Self { key, iv, decoder }
    }
}

impl PacketPipeline for CryptoAlacPipeline {
    fn process(&mut self, payload: &mut [u8]) -> Option<Vec<u8>> {
        if !crate::crypto::decrypt_audio_payload(&self.key, &self.iv, payload) {
            return None;
        }
        let samples = self.decoder.decode(payload)?;
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        Some(bytes)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    filled: bool,
    seqnum: u16,
    rtp_timestamp: u32,
}

/// Diagnostic counters, in the spirit of the teacher's `JitterStats`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferStats {
    pub packets_admitted: u64,
    pub packets_dropped_late: u64,
    pub packets_dropped_bad: u64,
    pub cursor_jumps: u64,
}

pub struct ReorderBuffer {
    slots: Vec<Slot>,
    payloads: Vec<Vec<u8>>,
    capacity: usize,
    first_seqnum: Option<u16>,
    pipeline: Box<dyn PacketPipeline>,
    logger: Arc<dyn SessionLogger>,
    stats: BufferStats,
}

impl ReorderBuffer {
    /// `capacity` should be a power of two at least as large as the
    /// expected reorder distance (`spec.md` §3); 512 is the default.
    pub fn new(capacity: usize, pipeline: Box<dyn PacketPipeline>, logger: Arc<dyn SessionLogger>) -> Self {
        assert!(capacity.is_power_of_two(), "buffer capacity must be a power of two");
        Self {
            slots: vec![Slot::default(); capacity],
            payloads: vec![Vec::new(); capacity],
            capacity,
            first_seqnum: None,
            pipeline,
            logger,
            stats: BufferStats::default(),
        }
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit one raw RTP audio packet (12-byte header + encrypted/encoded
    /// payload). Returns `true` if the packet was admitted to a slot.
    pub fn queue(&mut self, packet: &[u8]) -> bool {
        let Some(header) = RtpHeader::parse(packet) else {
            self.logger.debug("reorder buffer: dropping packet with malformed RTP header");
            self.stats.packets_dropped_bad += 1;
            return false;
        };

        let mut payload = packet[RtpHeader::LEN..].to_vec();
        let Some(decoded) = self.pipeline.process(&mut payload) else {
            self.logger.debug("reorder buffer: dropping packet that failed decrypt/decode");
            self.stats.packets_dropped_bad += 1;
            return false;
        };

        let seq = header.sequence;

        let admit_index = match self.first_seqnum {
            None => {
                self.first_seqnum = Some(seq);
                Some(self.index_of(seq))
            }
            Some(cursor) => {
                let diff = sequence_diff(cursor, seq);
                if diff >= 0 && (diff as usize) < self.capacity {
                    Some(self.index_of(seq))
                } else if diff < 0 {
                    self.stats.packets_dropped_late += 1;
                    None
                } else {
                    // Jumped ahead by more than capacity: the gap is
                    // unrecoverable with the current window, so the cursor
                    // jumps forward and every slot is cleared.
                    self.stats.cursor_jumps += 1;
                    self.clear_all();
                    self.first_seqnum = Some(seq);
                    Some(self.index_of(seq))
                }
            }
        };

        let Some(idx) = admit_index else {
            return false;
        };

        self.slots[idx] = Slot {
            filled: true,
            seqnum: seq,
            rtp_timestamp: header.timestamp,
        };
        self.payloads[idx] = decoded;
        self.stats.packets_admitted += 1;
        true
    }

    fn index_of(&self, seq: u16) -> usize {
        (seq as usize) % self.capacity
    }

    fn clear_all(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::default();
        }
        for payload in &mut self.payloads {
            payload.clear();
        }
    }

    /// Dequeue the frame at the cursor, if filled, and advance the cursor.
    ///
    /// `no_resend` documents caller intent (whether resend requests are
    /// being issued for this session) but does not change this method's
    /// behavior: an unfilled cursor slot always yields `None` here, since
    /// this buffer never blocks. There is no timeout that promotes a gap —
    /// a packet lost past the resend window stalls the stream until an
    /// external `flush` moves the cursor (`spec.md` §9, Open Question (d)).
    pub fn dequeue(&mut self, _no_resend: bool) -> Option<DecodedFrame> {
        let cursor = self.first_seqnum?;
        let idx = self.index_of(cursor);
        let slot = self.slots[idx];
        if !slot.filled || slot.seqnum != cursor {
            return None;
        }

        self.slots[idx].filled = false;
        let payload = std::mem::take(&mut self.payloads[idx]);
        self.first_seqnum = Some(cursor.wrapping_add(1));

        Some(DecodedFrame {
            seqnum: cursor,
            rtp_timestamp: slot.rtp_timestamp,
            payload,
        })
    }

    /// Walk forward from the cursor up to `horizon` slots, emitting one
    /// `emit(first_missing, count)` call per contiguous run of unfilled
    /// slots. `horizon` should be bounded to at most half the capacity.
    pub fn handle_resends(&self, horizon: usize, mut emit: impl FnMut(u16, u16)) {
        let Some(cursor) = self.first_seqnum else {
            return;
        };
        let scan = horizon.min(self.capacity);

        let mut i = 0usize;
        while i < scan {
            let seq = cursor.wrapping_add(i as u16);
            let idx = self.index_of(seq);
            let present = self.slots[idx].filled && self.slots[idx].seqnum == seq;

            if present {
                i += 1;
                continue;
            }

            let first_missing = seq;
            let mut count: u16 = 0;
            while i < scan {
                let seq2 = cursor.wrapping_add(i as u16);
                let idx2 = self.index_of(seq2);
                if self.slots[idx2].filled && self.slots[idx2].seqnum == seq2 {
                    break;
                }
                count += 1;
                i += 1;
            }
            emit(first_missing, count);
        }
    }

    /// Clear all slots. `next_seq = None` is the `NoFlush`/`-1` sentinel
    /// from `spec.md` §4.2 — cursor becomes undefined again. `Some(seq)`
    /// realigns the cursor so the next admission at `seq` dequeues first.
    pub fn flush(&mut self, next_seq: Option<u16>) {
        self.clear_all();
        self.first_seqnum = next_seq;
    }
}
