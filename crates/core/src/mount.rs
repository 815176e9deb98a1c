//! Mount registry (§4.5, §3 data model): process-wide mapping from a URL
//! path to a [`Mount`], and the [`Stream`]/[`Subscriber`] bookkeeping that
//! fans incoming RTP out to subscribed clients.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, RtspError};
use crate::transport::ConnectionHandle;
use crate::transport::udp::RtpListenerHandle;

/// How a subscriber receives RTP payloads (§3, Subscriber row).
#[derive(Debug, Clone)]
pub enum SubscriberTransport {
    /// Plain UDP unicast to a negotiated client port.
    Udp { dest: SocketAddr },
    /// In-band on the subscriber's own RTSP TCP connection, `$`-framed
    /// (RFC 2326 §10.12) on the given RTP channel.
    Interleaved { rtp_channel: u8 },
}

/// A single client subscribed to a [`Stream`] (added on SETUP+PLAY, §4.2).
pub struct Subscriber {
    pub session_id: String,
    pub transport: SubscriberTransport,
    /// Weak handle to the subscriber's control connection. Upgrade failure
    /// means the connection has dropped and this subscriber is stale.
    handle: Weak<ConnectionHandle>,
}

impl Subscriber {
    pub fn new(
        session_id: String,
        transport: SubscriberTransport,
        handle: &Arc<ConnectionHandle>,
    ) -> Self {
        Self {
            session_id,
            transport,
            handle: Arc::downgrade(handle),
        }
    }

    /// Clone the fields needed to deliver to this subscriber without holding
    /// the `subscribers` lock (§5: snapshot under the lock, write outside it).
    fn snapshot(&self) -> SubscriberSnapshot {
        SubscriberSnapshot {
            session_id: self.session_id.clone(),
            transport: self.transport.clone(),
            handle: self.handle.clone(),
        }
    }
}

/// An owned copy of the fields of a [`Subscriber`] needed to deliver one
/// payload, detached from the `subscribers` list so delivery never holds
/// its lock.
struct SubscriberSnapshot {
    session_id: String,
    transport: SubscriberTransport,
    handle: Weak<ConnectionHandle>,
}

impl SubscriberSnapshot {
    /// Deliver one RTP payload to this subscriber. Returns `Err` if the
    /// connection is gone or the write failed — either way the caller
    /// should drop the subscriber.
    fn deliver(&self, socket: &std::net::UdpSocket, payload: &[u8]) -> Result<()> {
        match &self.transport {
            SubscriberTransport::Udp { dest } => {
                socket.send_to(payload, dest)?;
                Ok(())
            }
            SubscriberTransport::Interleaved { rtp_channel } => {
                let handle = self.handle.upgrade().ok_or(RtspError::PeerClosed)?;
                let frame = crate::protocol::interleaved::encode(*rtp_channel, payload);
                handle.write_all(&frame)
            }
        }
    }
}

/// One numbered sub-stream of a [`Mount`] (e.g. `streamid=0`).
///
/// Created on the first SETUP naming that index (§4.2); owns the RTP/RTCP
/// port pair allocated for it and the list of subscribed clients.
pub struct Stream {
    pub index: usize,
    pub rtp_port: u16,
    pub rtcp_port: u16,
    /// Bound RTP socket, held here from allocation until RECORD spawns the
    /// listener thread on it (which takes ownership via `take_rtp_socket`).
    rtp_socket: Mutex<Option<std::net::UdpSocket>>,
    /// Bound RTCP socket. RTCP feedback processing is out of scope (§1
    /// Non-goals); this is held only to keep the port reserved for the
    /// lifetime of the stream.
    _rtcp_socket: std::net::UdpSocket,
    subscribers: Mutex<Vec<Subscriber>>,
    listener: Mutex<Option<RtpListenerHandle>>,
    /// Per-connection channel pair when the *source* publishes this stream
    /// interleaved rather than over UDP. `None` until the owning SETUP
    /// negotiates `interleaved=a-b`.
    source_interleaved_channel: Mutex<Option<u8>>,
}

impl Stream {
    pub fn new(pair: crate::transport::udp::AllocatedPortPair, index: usize) -> Self {
        Self {
            index,
            rtp_port: pair.rtp_port,
            rtcp_port: pair.rtcp_port,
            rtp_socket: Mutex::new(Some(pair.rtp_socket)),
            _rtcp_socket: pair.rtcp_socket,
            subscribers: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            source_interleaved_channel: Mutex::new(None),
        }
    }

    /// Take ownership of the bound RTP socket to spawn its listener thread.
    /// Returns `None` if the listener has already been started once.
    pub fn take_rtp_socket(&self) -> Option<std::net::UdpSocket> {
        self.rtp_socket.lock().take()
    }

    pub fn set_source_interleaved_channel(&self, rtp_channel: u8) {
        *self.source_interleaved_channel.lock() = Some(rtp_channel);
    }

    pub fn source_interleaved_channel(&self) -> Option<u8> {
        *self.source_interleaved_channel.lock()
    }

    pub fn set_listener(&self, listener: RtpListenerHandle) {
        *self.listener.lock() = Some(listener);
    }

    /// Stop this stream's RTP listener, if one is running (§4.3 teardown).
    pub fn stop_listener(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.stop();
        }
    }

    pub fn add_subscriber(&self, subscriber: Subscriber) {
        self.subscribers.lock().push(subscriber);
    }

    pub fn remove_subscriber(&self, session_id: &str) {
        self.subscribers
            .lock()
            .retain(|s| s.session_id != session_id);
    }

    /// Fan one received RTP datagram out to every subscriber currently in
    /// the Playing state (§4.4). Snapshots the subscriber list under the
    /// lock, then delivers with the lock released, per §5 — a slow
    /// subscriber never blocks delivery to the others, or `add_subscriber`/
    /// `remove_subscriber` on this stream.
    ///
    /// `is_playing` lets the caller consult session state without this
    /// module depending on [`crate::session::SessionManager`] directly.
    pub fn broadcast(
        &self,
        socket: &std::net::UdpSocket,
        payload: &[u8],
        is_playing: impl Fn(&str) -> bool,
    ) {
        let snapshot: Vec<SubscriberSnapshot> = self
            .subscribers
            .lock()
            .iter()
            .filter(|sub| is_playing(&sub.session_id))
            .map(Subscriber::snapshot)
            .collect();

        let mut dead = Vec::new();
        for sub in snapshot {
            if let Err(err) = sub.deliver(socket, payload) {
                tracing::debug!(session_id = sub.session_id, %err, "subscriber write failed, evicting");
                dead.push(sub.session_id);
            }
        }

        if !dead.is_empty() {
            self.subscribers.lock().retain(|s| !dead.contains(&s.session_id));
        }
    }

    /// Broadcast an interleaved RTP frame received on the source connection
    /// itself (§4.4, interleaved ingest) — no listener socket involved.
    pub fn broadcast_interleaved(&self, payload: &[u8], is_playing: impl Fn(&str) -> bool) {
        let snapshot: Vec<SubscriberSnapshot> = self
            .subscribers
            .lock()
            .iter()
            .filter(|sub| is_playing(&sub.session_id))
            .map(Subscriber::snapshot)
            .collect();

        let mut dead = Vec::new();
        for sub in snapshot {
            let result = match &sub.transport {
                SubscriberTransport::Udp { .. } => {
                    // No listener socket is bound in interleaved-source mode;
                    // UDP-transport clients simply receive nothing.
                    Ok(())
                }
                SubscriberTransport::Interleaved { rtp_channel } => sub
                    .handle
                    .upgrade()
                    .ok_or(RtspError::PeerClosed)
                    .and_then(|h| {
                        h.write_all(&crate::protocol::interleaved::encode(*rtp_channel, payload))
                    }),
            };
            if let Err(err) = result {
                tracing::debug!(session_id = sub.session_id, %err, "interleaved subscriber write failed, evicting");
                dead.push(sub.session_id);
            }
        }
        if !dead.is_empty() {
            self.subscribers.lock().retain(|s| !dead.contains(&s.session_id));
        }
    }
}

/// A named mount point (§3): the SDP a Source ANNOUNCEd, its ordered
/// streams, and whether a Source currently holds it RECORDed.
pub struct Mount {
    path: String,
    sdp: RwLock<String>,
    streams: RwLock<Vec<Arc<Stream>>>,
    mounted: AtomicBool,
    source_host: RwLock<Option<String>>,
    /// Session id of the Source that owns this Mount, set at ANNOUNCE.
    /// Used to reject a second ANNOUNCE/RECORD from a different connection.
    source_session_id: RwLock<Option<String>>,
}

impl Mount {
    pub fn new(path: &str, sdp: String) -> Self {
        Self {
            path: path.to_string(),
            sdp: RwLock::new(sdp),
            streams: RwLock::new(Vec::new()),
            mounted: AtomicBool::new(false),
            source_host: RwLock::new(None),
            source_session_id: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sdp(&self) -> String {
        self.sdp.read().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub fn set_source_session_id(&self, id: &str) {
        *self.source_session_id.write() = Some(id.to_string());
    }

    pub fn owns(&self, session_id: &str) -> bool {
        self.source_session_id.read().as_deref() == Some(session_id)
    }

    /// Mark this mount as actively recording (RECORD side effect, §4.2).
    pub fn mark_recording(&self, source_host: String) {
        *self.source_host.write() = Some(source_host);
        self.mounted.store(true, Ordering::SeqCst);
    }

    /// Number of `m=` lines in the ANNOUNCEd SDP — the number of streams to
    /// pre-allocate port pairs for at RECORD (§4.4, §6).
    pub fn media_line_count(&self) -> usize {
        crate::protocol::sdp::count_media_lines(&self.sdp.read())
    }

    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams.read().clone()
    }

    pub fn get_stream(&self, index: usize) -> Option<Arc<Stream>> {
        self.streams.read().iter().find(|s| s.index == index).cloned()
    }

    /// Returns the stream at `index`, creating it (with a freshly allocated
    /// port pair) if this is the first SETUP to name it.
    pub fn get_or_create_stream(
        &self,
        index: usize,
        allocator: &crate::transport::udp::PortAllocator,
    ) -> Result<Arc<Stream>> {
        if let Some(existing) = self.get_stream(index) {
            return Ok(existing);
        }
        let pair = allocator.allocate_pair()?;
        let stream = Arc::new(Stream::new(pair, index));
        self.streams.write().push(stream.clone());
        Ok(stream)
    }

    /// Stop every stream's RTP listener and clear recording state (§4.3
    /// TEARDOWN on a Source).
    pub fn stop_recording(&self) {
        for stream in self.streams.read().iter() {
            stream.stop_listener();
        }
        self.mounted.store(false, Ordering::SeqCst);
        *self.source_host.write() = None;
    }

    /// Remove a session's subscription from every stream of this mount
    /// (§4.3 TEARDOWN on a Client, and disconnect cleanup).
    pub fn unsubscribe(&self, session_id: &str) {
        for stream in self.streams.read().iter() {
            stream.remove_subscriber(session_id);
        }
    }
}

/// Normalize a raw RTSP request-URI path: strip the `rtsp://host[:port]`
/// prefix, collapse `//`, drop a trailing `/` except on the root, and strip
/// a trailing `/streamid=N` or `/trackN` suffix used to address a numbered
/// sub-stream (§4.5, §4.2).
pub fn normalize_mount_path(uri: &str) -> String {
    let mut path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => after[slash..].to_string(),
            None => "/".to_string(),
        }
    } else if let Some(stripped) = uri.strip_prefix('*') {
        stripped.to_string()
    } else {
        uri.to_string()
    };

    if let Some(query) = path.find('?') {
        path.truncate(query);
    }

    if let Some(pos) = path.rfind("/streamid=") {
        path.truncate(pos);
    } else if let Some(pos) = path.rfind("/track") {
        path.truncate(pos);
    }

    while path.contains("//") {
        path = path.replace("//", "/");
    }

    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    if path.is_empty() {
        path = "/".to_string();
    }

    path
}

/// Extract the numbered sub-stream index from a `.../streamid=N` or
/// `.../trackN` suffix. Defaults to `0` when absent (single-stream mounts).
pub fn stream_index_from_uri(uri: &str) -> usize {
    if let Some(pos) = uri.rfind("streamid=") {
        return uri[pos + "streamid=".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .unwrap_or(0);
    }
    if let Some(pos) = uri.rfind("/track") {
        return uri[pos + "/track".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .unwrap_or(0);
    }
    0
}

/// Process-wide registry of mount points, keyed by normalized path.
#[derive(Clone)]
pub struct MountRegistry {
    mounts: Arc<Mutex<HashMap<String, Arc<Mount>>>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self {
            mounts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a Mount at `path`. Rejected (`AlreadyExists`) if the path
    /// already maps to a Mount regardless of its `mounted` state (§4.5).
    pub fn create(&self, path: &str, sdp: String) -> Result<Arc<Mount>> {
        let mut mounts = self.mounts.lock();
        if mounts.contains_key(path) {
            return Err(RtspError::AlreadyExists(path.to_string()));
        }
        let mount = Arc::new(Mount::new(path, sdp));
        mounts.insert(path.to_string(), mount.clone());
        tracing::info!(path, "mount created");
        Ok(mount)
    }

    pub fn lookup(&self, path: &str) -> Result<Arc<Mount>> {
        self.mounts
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| RtspError::NotFound(path.to_string()))
    }

    /// Remove the mount at `path` from the registry. Existing `Arc<Mount>`
    /// handles held by in-flight requests remain valid until dropped, but
    /// no new `lookup` will find it (invariant 1, §8).
    pub fn unmount(&self, path: &str) {
        if self.mounts.lock().remove(path).is_some() {
            tracing::info!(path, "mount removed");
        }
    }
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::new()
    }
}
