//! The session engine: socket triad, receive/dispatch loop, clock-sync
//! state, and the resend emitter.
//!
//! A public handle type owns `start`/`stop`; a worker thread is spawned on
//! `start_audio` and joined on `stop`, driven by a short `set_read_timeout`
//! poll on each socket rather than a literal `select(2)` call.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::num::Wrapping;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use socket2::{Domain, Socket, Type};

use crate::buffer::{CryptoAlacPipeline, ReorderBuffer};
use crate::codec::{AlacCodec, AlacStreamInfo};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::log::SessionLogger;
use crate::mailbox::{clamp_volume, EventMailbox, MailboxDrain, NO_FLUSH};
use crate::rtp::{build_resend_request, ntp_to_unix_us, RtpHeader, SyncPacket};
use crate::sink::{AudioSink, PcmFrame};

/// Ephemeral local ports chosen at `start_audio`, reported back to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalPorts {
    pub control: u16,
    pub timing: u16,
    pub data: u16,
}

#[derive(Debug, Clone, Copy)]
struct ClockAnchor {
    sync_ntp_us: i64,
    sync_rtp_ts: u32,
}

/// `running`/`joined` plus the mailbox, guarded by one lock so the worker's
/// exit transition and a pending mailbox drain are always observed
/// together.
struct Shared {
    running: bool,
    joined: bool,
    mailbox: EventMailbox,
}

/// One RTP audio session: one bound socket triad, one worker thread, one
/// sink. Constructed with [`Session::init`], driven with `start_audio`/
/// `stop`; dropping a `Session` implicitly stops it.
pub struct Session<S: AudioSink + 'static> {
    remote_ip: IpAddr,
    #[allow(dead_code)] // retained for API parity; the timing socket is bound but silent (spec.md §9, Open Question (b))
    timing_rport: u16,
    aes_key: [u8; 16],
    aes_iv: [u8; 16],
    #[allow(dead_code)] // retained for API parity with the archival init signature
    ecdh_secret: Vec<u8>,
    config: SessionConfig,
    logger: Arc<dyn SessionLogger>,
    sink: Arc<Mutex<S>>,
    shared: Arc<Mutex<Shared>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: AudioSink + 'static> Session<S> {
    /// Parse the remote address (4 bytes → IPv4, 16 bytes → IPv6, anything
    /// else fails) and allocate a session in the Idle state.
    pub fn init(
        logger: Arc<dyn SessionLogger>,
        sink: S,
        remote_addr_bytes: &[u8],
        aes_key: [u8; 16],
        aes_iv: [u8; 16],
        ecdh_secret: Vec<u8>,
        timing_rport: u16,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        let remote_ip = match remote_addr_bytes.len() {
            4 => IpAddr::V4(Ipv4Addr::new(
                remote_addr_bytes[0],
                remote_addr_bytes[1],
                remote_addr_bytes[2],
                remote_addr_bytes[3],
            )),
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(remote_addr_bytes);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => {
                return Err(SessionError::InvalidArgument(format!(
                    "remote address must be 4 or 16 bytes, got {other}"
                )))
            }
        };

        Ok(Self {
            remote_ip,
            timing_rport,
            aes_key,
            aes_iv,
            ecdh_secret,
            config,
            logger,
            sink: Arc::new(Mutex::new(sink)),
            shared: Arc::new(Mutex::new(Shared {
                running: false,
                joined: true,
                mailbox: EventMailbox::default(),
            })),
            worker: Mutex::new(None),
        })
    }

    /// True whenever the session is not fully Idle, i.e. `running` or not
    /// yet `joined` (`spec.md` §4.1).
    pub fn is_running(&self) -> bool {
        let s = self.shared.lock();
        s.running || !s.joined
    }

    /// Bind the socket triad and spawn the worker. Idempotent: returns
    /// `Ok(None)` without effect if the session is not currently Idle.
    /// UDP transport is the only one implemented; non-UDP transports are a
    /// non-goal, so `use_udp` is accepted for signature parity but not
    /// otherwise consulted.
    pub fn start_audio(&self, _use_udp: bool, control_rport: u16) -> SessionResult<Option<LocalPorts>> {
        {
            let mut s = self.shared.lock();
            if !(s.joined && !s.running) {
                return Ok(None);
            }
            s.running = true;
            s.joined = false;
        }

        let bind_result = (|| -> std::io::Result<(UdpSocket, UdpSocket, UdpSocket)> {
            let control = bind_ephemeral_udp(self.remote_ip)?;
            let timing = bind_ephemeral_udp(self.remote_ip)?;
            let data = bind_ephemeral_udp(self.remote_ip)?;
            control.set_read_timeout(Some(self.config.poll_interval))?;
            data.set_read_timeout(Some(self.config.poll_interval))?;
            Ok((control, timing, data))
        })();

        let (control_socket, timing_socket, data_socket) = match bind_result {
            Ok(sockets) => sockets,
            Err(e) => {
                let mut s = self.shared.lock();
                s.running = false;
                s.joined = true;
                self.logger.error(&format!("start_audio: socket bind failed: {e}"));
                return Err(SessionError::ResourceExhausted(e.to_string()));
            }
        };

        let ports = LocalPorts {
            control: control_socket.local_addr().map_err(SessionError::TransientIo)?.port(),
            timing: timing_socket.local_addr().map_err(SessionError::TransientIo)?.port(),
            data: data_socket.local_addr().map_err(SessionError::TransientIo)?.port(),
        };

        let shared = Arc::clone(&self.shared);
        let sink = Arc::clone(&self.sink);
        let logger = Arc::clone(&self.logger);
        let config = self.config.clone();
        let aes_key = self.aes_key;
        let aes_iv = self.aes_iv;

        let handle = thread::spawn(move || {
            worker_loop(
                shared,
                sink,
                logger,
                config,
                aes_key,
                aes_iv,
                control_socket,
                timing_socket,
                data_socket,
                control_rport,
            );
        });
        *self.worker.lock() = Some(handle);

        Ok(Some(ports))
    }

    /// Flip `running` off and join the worker if one is outstanding
    /// (covers both a normally Active session and one whose worker already
    /// exited on its own after a fatal socket error). No-op once fully
    /// joined.
    pub fn stop(&self) {
        {
            let mut s = self.shared.lock();
            if s.joined {
                return;
            }
            s.running = false;
        }

        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }

        let mut s = self.shared.lock();
        s.joined = true;
        s.running = false;
    }

    pub fn set_volume(&self, v: f32) {
        self.shared.lock().mailbox.set_volume(clamp_volume(v));
    }

    pub fn set_metadata(&self, bytes: Vec<u8>) -> SessionResult<()> {
        if bytes.is_empty() {
            return Err(SessionError::InvalidArgument("metadata must be non-empty".into()));
        }
        self.shared.lock().mailbox.set_metadata(bytes);
        Ok(())
    }

    pub fn set_coverart(&self, bytes: Vec<u8>) -> SessionResult<()> {
        if bytes.is_empty() {
            return Err(SessionError::InvalidArgument("coverart must be non-empty".into()));
        }
        self.shared.lock().mailbox.set_coverart(bytes);
        Ok(())
    }

    pub fn remote_control_id(&self, dacp_id: &str, active_remote_header: &str) -> SessionResult<()> {
        if dacp_id.is_empty() || active_remote_header.is_empty() {
            return Err(SessionError::InvalidArgument(
                "dacp_id and active_remote_header must both be non-empty".into(),
            ));
        }
        self.shared
            .lock()
            .mailbox
            .set_remote_control_id(dacp_id.to_string(), active_remote_header.to_string());
        Ok(())
    }

    pub fn set_progress(&self, start: u32, curr: u32, end: u32) {
        self.shared.lock().mailbox.set_progress(start, curr, end);
    }

    /// `next_seq == NO_FLUSH` means "no pending flush" and is a no-op;
    /// otherwise the reorder buffer realigns its cursor to `next_seq` once
    /// the worker drains this event.
    pub fn flush(&self, next_seq: i32) {
        self.shared.lock().mailbox.set_flush(next_seq);
    }
}

impl<S: AudioSink + 'static> Drop for Session<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_ephemeral_udp(remote_ip: IpAddr) -> std::io::Result<UdpSocket> {
    let (domain, bind_addr): (Domain, SocketAddr) = match remote_ip {
        IpAddr::V4(_) => (Domain::IPV4, (Ipv4Addr::UNSPECIFIED, 0).into()),
        IpAddr::V6(_) => (Domain::IPV6, (Ipv6Addr::UNSPECIFIED, 0).into()),
    };
    let socket = Socket::new(domain, Type::DGRAM, None)?;
    socket.bind(&bind_addr.into())?;
    Ok(socket.into())
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}

fn compute_pts(anchor: &ClockAnchor, rtp_timestamp: u32, sample_rate: u32) -> i64 {
    let diff = rtp_timestamp.wrapping_sub(anchor.sync_rtp_ts) as i32 as i64;
    anchor.sync_ntp_us + diff * 1_000_000 / sample_rate as i64
}

fn dispatch_drain<S: AudioSink>(
    sink: &mut S,
    cb_data: &mut S::Data,
    buffer: &mut ReorderBuffer,
    drain: MailboxDrain,
    logger: &dyn SessionLogger,
) {
    if let Some(v) = drain.volume {
        sink.audio_set_volume(cb_data, v);
    }
    if let Some(target) = drain.flush_target {
        if target != NO_FLUSH {
            buffer.flush(Some(target as u16));
            sink.audio_flush(cb_data);
            logger.debug("reorder buffer flushed");
        }
    }
    if let Some(bytes) = drain.metadata {
        sink.audio_set_metadata(cb_data, &bytes);
    }
    if let Some(bytes) = drain.coverart {
        sink.audio_set_coverart(cb_data, &bytes);
    }
    if let Some((dacp_id, active_remote_header)) = drain.remote_control_id {
        sink.audio_remote_control_id(&dacp_id, &active_remote_header);
    }
    if let Some((start, curr, end)) = drain.progress {
        sink.audio_set_progress(cb_data, start, curr, end);
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop<S: AudioSink>(
    shared: Arc<Mutex<Shared>>,
    sink: Arc<Mutex<S>>,
    logger: Arc<dyn SessionLogger>,
    config: SessionConfig,
    aes_key: [u8; 16],
    aes_iv: [u8; 16],
    control_socket: UdpSocket,
    _timing_socket: UdpSocket,
    data_socket: UdpSocket,
    control_rport: u16,
) {
    let decoder = AlacCodec::new(AlacStreamInfo::default());
    let pipeline = CryptoAlacPipeline::new(aes_key, aes_iv, Box::new(decoder));
    let mut buffer = ReorderBuffer::new(config.buffer_capacity, Box::new(pipeline), Arc::clone(&logger));

    let mut control_saddr: Option<SocketAddr> = None;
    let mut anchor: Option<ClockAnchor> = None;
    let mut resend_counter = Wrapping(0u16);
    let mut recv_buf = [0u8; 2048];

    let mut cb_data = sink.lock().audio_init();

    loop {
        let drain = shared.lock().mailbox.drain();
        {
            let mut sink_guard = sink.lock();
            dispatch_drain(&mut *sink_guard, &mut cb_data, &mut buffer, drain, &*logger);
        }

        if !shared.lock().running {
            break;
        }

        let mut fatal = false;

        match control_socket.recv_from(&mut recv_buf) {
            Ok((n, from)) => {
                control_saddr = Some(from);
                let payload = &recv_buf[..n];
                match payload.get(1).map(|b| b & 0x7F) {
                    Some(0x56) => {
                        if n > 4 {
                            buffer.queue(&payload[4..]);
                        } else {
                            logger.debug("retransmitted-audio envelope too short");
                        }
                    }
                    Some(0x54) => match SyncPacket::parse(payload) {
                        Some(sync) => {
                            anchor = Some(ClockAnchor {
                                sync_ntp_us: ntp_to_unix_us(sync.ntp_timestamp),
                                sync_rtp_ts: sync.rtp_timestamp,
                            });
                        }
                        None => logger.debug("malformed sync packet"),
                    },
                    _ => logger.debug("ignoring unrecognized control payload type"),
                }
            }
            Err(e) if is_timeout(&e) => {}
            Err(e) => {
                logger.warn(&format!("control socket recv failed, stopping worker: {e}"));
                fatal = true;
            }
        }

        match data_socket.recv_from(&mut recv_buf) {
            Ok((n, _from)) => {
                if n >= RtpHeader::LEN {
                    buffer.queue(&recv_buf[..n]);
                } else {
                    logger.debug("dropping data packet shorter than an RTP header");
                }

                loop {
                    let Some(frame) = buffer.dequeue(control_rport == 0) else {
                        break;
                    };
                    let pts = anchor
                        .map(|a| compute_pts(&a, frame.rtp_timestamp, config.sample_rate))
                        .unwrap_or(0);
                    let mut sink_guard = sink.lock();
                    sink_guard.audio_process(
                        &mut cb_data,
                        PcmFrame {
                            pts,
                            data: &frame.payload,
                        },
                    );
                }

                if control_rport != 0 {
                    if let Some(dest) = control_saddr {
                        let mut gaps = Vec::new();
                        buffer.handle_resends(config.resend_horizon, |first, count| gaps.push((first, count)));
                        for (first, count) in gaps {
                            let ours = resend_counter.0;
                            resend_counter += Wrapping(1);
                            let packet = build_resend_request(ours, first, count);
                            if let Err(e) = control_socket.send_to(&packet, dest) {
                                logger.warn(&format!("resend request send failed: {e}"));
                            }
                        }
                    }
                }
            }
            Err(e) if is_timeout(&e) => {}
            Err(e) => {
                logger.warn(&format!("data socket recv failed, stopping worker: {e}"));
                fatal = true;
            }
        }

        if fatal {
            shared.lock().running = false;
            break;
        }
    }

    shared.lock().running = false;
    sink.lock().audio_destroy(cb_data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::NullLogger;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        inits: Arc<AtomicUsize>,
        destroys: Arc<AtomicUsize>,
    }

    impl AudioSink for CountingSink {
        type Data = ();

        fn audio_init(&mut self) -> Self::Data {
            self.inits.fetch_add(1, Ordering::SeqCst);
        }

        fn audio_process(&mut self, _data: &mut Self::Data, _frame: PcmFrame<'_>) {}

        fn audio_destroy(&mut self, _data: Self::Data) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn make_session(sink: CountingSink) -> Session<CountingSink> {
        Session::init(
            Arc::new(NullLogger),
            sink,
            &[127, 0, 0, 1],
            [0u8; 16],
            [0u8; 16],
            Vec::new(),
            6002,
            SessionConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn init_rejects_malformed_remote_address() {
        let err = Session::init(
            Arc::new(NullLogger),
            CountingSink {
                inits: Arc::new(AtomicUsize::new(0)),
                destroys: Arc::new(AtomicUsize::new(0)),
            },
            &[1, 2, 3],
            [0u8; 16],
            [0u8; 16],
            Vec::new(),
            0,
            SessionConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
    }

    #[test]
    fn init_accepts_ipv4_and_ipv6_remote_addresses() {
        assert!(Session::init(
            Arc::new(NullLogger),
            CountingSink { inits: Arc::new(AtomicUsize::new(0)), destroys: Arc::new(AtomicUsize::new(0)) },
            &[127, 0, 0, 1],
            [0u8; 16],
            [0u8; 16],
            Vec::new(),
            0,
            SessionConfig::default(),
        )
        .is_ok());

        assert!(Session::init(
            Arc::new(NullLogger),
            CountingSink { inits: Arc::new(AtomicUsize::new(0)), destroys: Arc::new(AtomicUsize::new(0)) },
            &[0u8; 16],
            [0u8; 16],
            [0u8; 16],
            Vec::new(),
            0,
            SessionConfig::default(),
        )
        .is_ok());
    }

    #[test]
    fn is_idle_until_started() {
        let session = make_session(CountingSink {
            inits: Arc::new(AtomicUsize::new(0)),
            destroys: Arc::new(AtomicUsize::new(0)),
        });
        assert!(!session.is_running());
    }

    #[test]
    fn start_stop_lifecycle_invokes_init_and_destroy_exactly_once() {
        let inits = Arc::new(AtomicUsize::new(0));
        let destroys = Arc::new(AtomicUsize::new(0));
        let session = make_session(CountingSink {
            inits: Arc::clone(&inits),
            destroys: Arc::clone(&destroys),
        });

        let ports = session.start_audio(true, 6001).unwrap().expect("session was idle");
        assert_ne!(ports.control, 0);
        assert_ne!(ports.timing, 0);
        assert_ne!(ports.data, 0);
        assert!(session.is_running());

        let started = std::time::Instant::now();
        session.stop();
        assert!(started.elapsed() < std::time::Duration::from_millis(200));

        assert!(!session.is_running());
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn start_audio_is_idempotent_while_active() {
        let session = make_session(CountingSink {
            inits: Arc::new(AtomicUsize::new(0)),
            destroys: Arc::new(AtomicUsize::new(0)),
        });
        session.start_audio(true, 6001).unwrap().expect("first start succeeds");
        let second = session.start_audio(true, 6001).unwrap();
        assert!(second.is_none());
        session.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let session = make_session(CountingSink {
            inits: Arc::new(AtomicUsize::new(0)),
            destroys: Arc::new(AtomicUsize::new(0)),
        });
        session.start_audio(true, 6001).unwrap();
        session.stop();
        session.stop();
        assert!(!session.is_running());
    }

    #[test]
    fn set_metadata_and_coverart_reject_empty_payloads() {
        let session = make_session(CountingSink {
            inits: Arc::new(AtomicUsize::new(0)),
            destroys: Arc::new(AtomicUsize::new(0)),
        });
        assert!(session.set_metadata(Vec::new()).is_err());
        assert!(session.set_metadata(vec![1, 2, 3]).is_ok());
        assert!(session.set_coverart(Vec::new()).is_err());
        assert!(session.set_coverart(vec![1]).is_ok());
    }

    #[test]
    fn remote_control_id_rejects_empty_strings() {
        let session = make_session(CountingSink {
            inits: Arc::new(AtomicUsize::new(0)),
            destroys: Arc::new(AtomicUsize::new(0)),
        });
        assert!(session.remote_control_id("", "AAAA").is_err());
        assert!(session.remote_control_id("dacp", "").is_err());
        assert!(session.remote_control_id("dacp", "AAAA").is_ok());
    }

    #[test]
    fn pts_is_zero_without_sync_and_tracks_anchor_after_sync() {
        let anchor = ClockAnchor {
            sync_ntp_us: 1_700_000_000 * 1_000_000,
            sync_rtp_ts: 100 * 352,
        };
        let pts_at_anchor = compute_pts(&anchor, 100 * 352, 44_100);
        assert_eq!(pts_at_anchor, anchor.sync_ntp_us);

        let pts_one_frame_later = compute_pts(&anchor, 101 * 352, 44_100);
        assert_eq!(pts_one_frame_later - pts_at_anchor, 352 * 1_000_000 / 44_100);
    }

    #[test]
    fn pts_handles_32_bit_wraparound() {
        let anchor = ClockAnchor {
            sync_ntp_us: 0,
            sync_rtp_ts: u32::MAX - 10,
        };
        let pts = compute_pts(&anchor, 10, 44_100);
        let expected_diff = 21i64; // wraps past u32::MAX then 10 more samples
        assert_eq!(pts, expected_diff * 1_000_000 / 44_100);
    }

    struct FlushCountingSink {
        flushes: usize,
    }

    impl AudioSink for FlushCountingSink {
        type Data = ();

        fn audio_init(&mut self) -> Self::Data {}
        fn audio_process(&mut self, _data: &mut Self::Data, _frame: PcmFrame<'_>) {}
        fn audio_destroy(&mut self, _data: Self::Data) {}

        fn audio_flush(&mut self, _data: &mut Self::Data) {
            self.flushes += 1;
        }
    }

    struct IdentityPipeline;
    impl crate::buffer::PacketPipeline for IdentityPipeline {
        fn process(&mut self, payload: &mut [u8]) -> Option<Vec<u8>> {
            Some(payload.to_vec())
        }
    }

    fn make_test_buffer() -> ReorderBuffer {
        ReorderBuffer::new(512, Box::new(IdentityPipeline), Arc::new(NullLogger))
    }

    #[test]
    fn dispatch_drain_skips_no_flush_sentinel() {
        let mut sink = FlushCountingSink { flushes: 0 };
        let mut cb_data = sink.audio_init();
        let mut buffer = make_test_buffer();
        buffer.queue(&[0x80, 0x60, 0, 5, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2]);

        let drain = MailboxDrain {
            flush_target: Some(NO_FLUSH),
            ..Default::default()
        };
        dispatch_drain(&mut sink, &mut cb_data, &mut buffer, drain, &NullLogger);

        assert_eq!(sink.flushes, 0);
        // the buffer's cursor/contents are untouched by the no-op flush.
        assert!(buffer.dequeue(true).is_some());
    }

    #[test]
    fn dispatch_drain_applies_real_flush_target() {
        let mut sink = FlushCountingSink { flushes: 0 };
        let mut cb_data = sink.audio_init();
        let mut buffer = make_test_buffer();
        buffer.queue(&[0x80, 0x60, 0, 5, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2]);

        let drain = MailboxDrain {
            flush_target: Some(200),
            ..Default::default()
        };
        dispatch_drain(&mut sink, &mut cb_data, &mut buffer, drain, &NullLogger);

        assert_eq!(sink.flushes, 1);
        // the old seq=5 slot was cleared; only a fresh seq=200 admission dequeues.
        buffer.queue(&[0x80, 0x60, 0, 200, 0, 0, 0, 0, 0, 0, 0, 0, 9]);
        assert_eq!(buffer.dequeue(true).unwrap().seqnum, 200);
    }

    #[test]
    fn resend_counter_is_post_incremented() {
        let mut counter = Wrapping(0u16);
        let first = {
            let ours = counter.0;
            counter += Wrapping(1);
            ours
        };
        let second = {
            let ours = counter.0;
            counter += Wrapping(1);
            ours
        };
        assert_eq!(first, 0);
        assert_eq!(second, 1);
    }
}
