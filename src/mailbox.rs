//! Thread-safe holding area for control-plane events issued by a separate
//! signalling layer and drained once per worker-loop iteration.
//!
//! Mirrors the archival C session's plain struct fields guarded by its
//! session mutex (`raop_rtp->volume`, `->metadata`, `->coverart`, ...); here
//! each field is modeled as an `Option` so "no pending update" and "owned
//! heap blob" collapse into one type instead of a separate changed-bit plus
//! nullable pointer.

/// Sentinel meaning "no pending flush", per `spec.md` §4.1.
pub const NO_FLUSH: i32 = -42;

#[derive(Debug, Default)]
struct Volume {
    value: f32,
    changed: bool,
}

#[derive(Debug, Default)]
struct Progress {
    start: u32,
    curr: u32,
    end: u32,
    changed: bool,
}

/// Owned control-plane state, written to by session API calls and drained
/// by the worker thread. Always accessed under the session's mutex.
#[derive(Debug, Default)]
pub struct EventMailbox {
    volume: Volume,
    flush_target: Option<i32>,
    metadata: Option<Vec<u8>>,
    coverart: Option<Vec<u8>>,
    remote_control_id: Option<(String, String)>,
    progress: Progress,
}

/// One drain's worth of events, snapshotted out of the mailbox under the
/// lock and dispatched to the sink after the lock is released.
#[derive(Debug, Default)]
pub struct MailboxDrain {
    pub volume: Option<f32>,
    pub flush_target: Option<i32>,
    pub metadata: Option<Vec<u8>>,
    pub coverart: Option<Vec<u8>>,
    pub remote_control_id: Option<(String, String)>,
    pub progress: Option<(u32, u32, u32)>,
}

impl EventMailbox {
    pub fn set_volume(&mut self, clamped: f32) {
        self.volume.value = clamped;
        self.volume.changed = true;
    }

    pub fn set_flush(&mut self, next_seq: i32) {
        self.flush_target = Some(next_seq);
    }

    pub fn set_metadata(&mut self, bytes: Vec<u8>) {
        self.metadata = Some(bytes);
    }

    pub fn set_coverart(&mut self, bytes: Vec<u8>) {
        self.coverart = Some(bytes);
    }

    pub fn set_remote_control_id(&mut self, dacp_id: String, active_remote_header: String) {
        self.remote_control_id = Some((dacp_id, active_remote_header));
    }

    pub fn set_progress(&mut self, start: u32, curr: u32, end: u32) {
        self.progress = Progress {
            start,
            curr,
            end,
            changed: true,
        };
    }

    /// Snapshot every field, clearing "changed" bits and taking ownership
    /// of blobs so nothing is delivered twice. Must be called with the
    /// session mutex held; the returned [`MailboxDrain`] is dispatched
    /// after the lock is released (`spec.md` §4.3 step 3).
    pub fn drain(&mut self) -> MailboxDrain {
        let volume = if self.volume.changed {
            self.volume.changed = false;
            Some(self.volume.value)
        } else {
            None
        };

        let progress = if self.progress.changed {
            self.progress.changed = false;
            Some((self.progress.start, self.progress.curr, self.progress.end))
        } else {
            None
        };

        MailboxDrain {
            volume,
            flush_target: self.flush_target.take(),
            metadata: self.metadata.take(),
            coverart: self.coverart.take(),
            remote_control_id: self.remote_control_id.take(),
            progress,
        }
    }
}

/// Clamp a requested volume to `[-144.0, 0.0]`, forcing any positive value
/// to `0.0` (`spec.md` §4.1's `set_volume`).
pub fn clamp_volume(v: f32) -> f32 {
    if v > 0.0 {
        0.0
    } else if v < -144.0 {
        -144.0
    } else {
        v
    }
}
