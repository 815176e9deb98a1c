//! Shared, thread-safe handle to a connection's control-socket writer.
//!
//! A [`ConnectionHandle`] is the single point through which bytes are
//! written back to an RTSP client: ordinary RTSP responses from the
//! connection's own read/dispatch loop, and — for clients using interleaved
//! transport — `$`-framed RTP payloads written by an unrelated RTP listener
//! thread (§4.4). Both writers serialize through the same `Mutex` so a
//! response and an interleaved frame can never tear into one another on the
//! wire.
//!
//! Each [`crate::transport::tcp::Connection`] owns one `Arc<ConnectionHandle>`
//! strongly. Subscribers recorded on a [`crate::mount::Stream`] (§4.4, data
//! model) hold only a [`Weak`] reference: when the owning connection's
//! thread exits and drops its `Arc`, the weak reference stops upgrading and
//! the subscriber is evicted at the next broadcast pass, with no explicit
//! cross-thread cancellation required.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

pub struct ConnectionHandle {
    writer: Mutex<TcpStream>,
    peer_addr: SocketAddr,
}

impl ConnectionHandle {
    pub fn new(writer: TcpStream, peer_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            writer: Mutex::new(writer),
            peer_addr,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Write raw bytes to the control socket. Used for both serialized RTSP
    /// responses and `$`-framed interleaved RTP/RTCP payloads.
    pub fn write_all(&self, bytes: &[u8]) -> Result<()> {
        use std::io::Write;
        let mut writer = self.writer.lock();
        writer.write_all(bytes)?;
        Ok(())
    }
}
