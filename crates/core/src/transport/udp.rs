//! RTP/RTCP UDP transport: port allocation (§4.6) and the per-stream
//! receive loop that fans incoming RTP out to subscribers (§4.4).

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::mount::Stream;

const MAX_RETRIES: u32 = 16;
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// A bound RTP/RTCP port pair reserved for one [`Stream`].
///
/// Both sockets stay bound from allocation until the stream is torn down,
/// which is what makes "never returns a port currently held by a live
/// listener" (§4.6) true without any separate bookkeeping set.
pub struct AllocatedPortPair {
    pub rtp_port: u16,
    pub rtcp_port: u16,
    pub rtp_socket: UdpSocket,
    pub rtcp_socket: UdpSocket,
}

/// Cursor-based allocator over a configured port range (§4.6).
///
/// Always hands out an `(even, even + 1)` RTP/RTCP pair, per the parity
/// convention of RFC 3550 §11. The cursor advances on every attempt,
/// successful or not, so a port just released by a torn-down stream is not
/// immediately reoffered while the OS still has it in `TIME_WAIT`.
pub struct PortAllocator {
    min: u16,
    max: u16,
    cursor: Mutex<u16>,
}

impl PortAllocator {
    pub fn new(min: u16, max: u16) -> Self {
        let min = min + (min % 2);
        Self {
            min,
            max,
            cursor: Mutex::new(min),
        }
    }

    /// Allocate and bind the next available RTP/RTCP pair, retrying past
    /// `EADDRINUSE` up to `MAX_RETRIES` times before giving up.
    pub fn allocate_pair(&self) -> Result<AllocatedPortPair> {
        for _ in 0..MAX_RETRIES {
            let rtp_port = self.next_candidate();
            let rtcp_port = rtp_port + 1;
            if rtcp_port > self.max {
                continue;
            }
            if let (Ok(rtp_socket), Ok(rtcp_socket)) = (
                UdpSocket::bind(("0.0.0.0", rtp_port)),
                UdpSocket::bind(("0.0.0.0", rtcp_port)),
            ) {
                return Ok(AllocatedPortPair {
                    rtp_port,
                    rtcp_port,
                    rtp_socket,
                    rtcp_socket,
                });
            }
        }
        Err(RtspError::ResourceExhausted)
    }

    fn next_candidate(&self) -> u16 {
        let mut cursor = self.cursor.lock();
        let candidate = *cursor;
        *cursor = if candidate + 2 > self.max {
            self.min
        } else {
            candidate + 2
        };
        candidate
    }
}

/// Handle to a running RTP receive loop for one [`Stream`]. Dropping this
/// without calling [`stop`](Self::stop) leaks the thread — callers always
/// route teardown through `Stream::stop_listener` (§4.3).
pub struct RtpListenerHandle {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RtpListenerHandle {
    /// Spawn a thread that reads datagrams from `socket` and fans each one
    /// out via `stream.broadcast` until [`stop`](Self::stop) is called.
    ///
    /// `is_playing` lets the loop skip subscribers whose session has not
    /// reached the Playing state yet, without this module depending on
    /// [`crate::session::SessionManager`] directly.
    pub fn spawn(
        socket: UdpSocket,
        stream: Arc<Stream>,
        is_playing: impl Fn(&str) -> bool + Send + 'static,
    ) -> Result<Self> {
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_thread = stop_flag.clone();

        let thread = std::thread::spawn(move || {
            let mut buf = [0u8; 65_536];
            while !stop_flag_thread.load(Ordering::SeqCst) {
                match socket.recv(&mut buf) {
                    Ok(n) => stream.broadcast(&socket, &buf[..n], &is_playing),
                    Err(e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "rtp listener recv failed, exiting");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            stop_flag,
            thread: Some(thread),
        })
    }

    /// Signal the receive loop to exit and join its thread. Idempotent:
    /// `self.thread` is only ever `Some` once, so a repeat call is a no-op.
    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
