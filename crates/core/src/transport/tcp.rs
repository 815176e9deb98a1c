//! RTSP control connection: accept loop and the per-connection state
//! machine (§4.1-§4.3).

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::mount::{self, Mount, MountRegistry, Subscriber, SubscriberTransport};
use crate::protocol::transport_header::{parse_client_port, parse_interleaved_channels};
use crate::protocol::{RtspRequest, RtspResponse, interleaved};
use crate::session::{Role, Session, SessionManager, SessionState};
use crate::transport::ConnectionHandle;
use crate::transport::udp::{PortAllocator, RtpListenerHandle};

/// Non-blocking TCP accept loop; polls `running` between accepts so
/// `Server::stop` can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    mounts: MountRegistry,
    sessions: SessionManager,
    port_allocator: Arc<PortAllocator>,
    read_timeout: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let mounts = mounts.clone();
                let sessions = sessions.clone();
                let port_allocator = port_allocator.clone();
                thread::spawn(move || {
                    Connection::handle(stream, mounts, sessions, port_allocator, read_timeout);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

enum IncomingMessage {
    Request(RtspRequest),
    Interleaved { channel: u8, payload: Vec<u8> },
}

/// A single RTSP connection: starts role-agnostic, is promoted to Source
/// or Client by its first ANNOUNCE/DESCRIBE/SETUP, and owns exactly one
/// [`Session`] for its lifetime (§9 design notes).
struct Connection {
    reader: BufReader<TcpStream>,
    handle: Arc<ConnectionHandle>,
    peer_addr: SocketAddr,
    mounts: MountRegistry,
    sessions: SessionManager,
    port_allocator: Arc<PortAllocator>,
    role: Role,
    mount_path: Option<String>,
    session: Option<Arc<Session>>,
    /// Interleaved RTP channel -> stream index, populated at SETUP when a
    /// Source negotiates in-band delivery (§4.4).
    channel_to_stream: HashMap<u8, usize>,
    torn_down: bool,
}

impl Connection {
    fn handle(
        stream: TcpStream,
        mounts: MountRegistry,
        sessions: SessionManager,
        port_allocator: Arc<PortAllocator>,
        read_timeout: Duration,
    ) {
        let Ok(peer_addr) = stream.peer_addr() else {
            return;
        };
        let Ok(reader_stream) = stream.try_clone() else {
            return;
        };
        let _ = reader_stream.set_read_timeout(Some(read_timeout));

        tracing::info!(%peer_addr, "client connected");

        let mut connection = Connection {
            reader: BufReader::new(reader_stream),
            handle: ConnectionHandle::new(stream, peer_addr),
            peer_addr,
            mounts,
            sessions,
            port_allocator,
            role: Role::Unknown,
            mount_path: None,
            session: None,
            channel_to_stream: HashMap::new(),
            torn_down: false,
        };

        connection.run();
        tracing::info!(peer = %connection.peer_addr, "client disconnected");
    }

    fn run(&mut self) {
        loop {
            match self.read_message() {
                Ok(Some(IncomingMessage::Request(request))) => {
                    let Some(cseq) = request.cseq().map(str::to_string) else {
                        let _ = self.handle.write_all(&RtspResponse::bad_request().serialize());
                        continue;
                    };
                    let is_teardown = request.method.eq_ignore_ascii_case("TEARDOWN");
                    let response = self.dispatch(&request).with_cseq(&cseq);
                    if self.handle.write_all(&response.serialize()).is_err() {
                        break;
                    }
                    if is_teardown {
                        break;
                    }
                }
                Ok(Some(IncomingMessage::Interleaved { channel, payload })) => {
                    self.dispatch_interleaved(channel, &payload);
                }
                Ok(None) | Err(RtspError::PeerClosed) => break,
                Err(RtspError::PeerReset) => break,
                Err(err @ (RtspError::ProtocolViolation { .. } | RtspError::UnsupportedVersion(_))) => {
                    tracing::debug!(peer = %self.peer_addr, error = %err, "malformed request, responding and continuing");
                    if self
                        .handle
                        .write_all(&RtspResponse::from_error(&err).serialize())
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(peer = %self.peer_addr, error = %err, "connection error");
                    break;
                }
            }
        }
        self.teardown();
    }

    /// Read the next message: an RTSP request, or — on a connection that
    /// has negotiated at least one interleaved channel — an in-band RTP
    /// frame (§4.1, §4.4).
    fn read_message(&mut self) -> Result<Option<IncomingMessage>> {
        let mut first_byte = [0u8; 1];
        let n = match self.reader.read(&mut first_byte) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(RtspError::PeerClosed);
            }
            Err(e) => return Err(RtspError::Io(e)),
        };
        if n == 0 {
            return Ok(None);
        }

        if first_byte[0] == interleaved::SENTINEL {
            if self.channel_to_stream.is_empty() {
                return Err(RtspError::ProtocolViolation {
                    kind: ParseErrorKind::UnexpectedInterleavedFrame,
                });
            }
            let mut rest = [0u8; 3];
            self.reader
                .read_exact(&mut rest)
                .map_err(|_| RtspError::PeerReset)?;
            let channel = rest[0];
            let len = u16::from_be_bytes([rest[1], rest[2]]) as usize;
            let mut payload = vec![0u8; len];
            self.reader
                .read_exact(&mut payload)
                .map_err(|_| RtspError::PeerReset)?;
            return Ok(Some(IncomingMessage::Interleaved { channel, payload }));
        }

        let mut request_text = String::new();
        request_text.push(first_byte[0] as char);
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|_| RtspError::PeerReset)?;
            if read == 0 {
                return Err(RtspError::PeerReset);
            }
            request_text.push_str(&line);
            if line == "\r\n" || line == "\n" {
                break;
            }
        }

        let mut request = RtspRequest::parse_head(&request_text)?;
        let content_length = request.content_length();
        if content_length > 0 {
            let mut body = vec![0u8; content_length];
            self.reader
                .read_exact(&mut body)
                .map_err(|_| RtspError::PeerReset)?;
            request = request.with_body(body);
        }
        Ok(Some(IncomingMessage::Request(request)))
    }

    fn dispatch(&mut self, request: &RtspRequest) -> RtspResponse {
        let result = match request.method.to_ascii_uppercase().as_str() {
            "OPTIONS" => Ok(self.handle_options()),
            "ANNOUNCE" => self.handle_announce(request),
            "DESCRIBE" => self.handle_describe(request),
            "SETUP" => self.handle_setup(request),
            "RECORD" => self.handle_record(request),
            "PLAY" => self.handle_play(request),
            "PAUSE" => self.handle_pause(request),
            "TEARDOWN" => self.handle_teardown(request),
            "GET_PARAMETER" | "SET_PARAMETER" => Ok(RtspResponse::ok()),
            other => {
                tracing::debug!(peer = %self.peer_addr, method = other, "unsupported method");
                Ok(RtspResponse::not_implemented())
            }
        };
        result.unwrap_or_else(|err| {
            tracing::debug!(peer = %self.peer_addr, method = %request.method, error = %err, "request failed");
            RtspResponse::from_error(&err)
        })
    }

    fn dispatch_interleaved(&self, channel: u8, payload: &[u8]) {
        let Some(&index) = self.channel_to_stream.get(&channel) else {
            tracing::debug!(peer = %self.peer_addr, channel, "interleaved frame on unmapped channel");
            return;
        };
        let Some(path) = &self.mount_path else {
            return;
        };
        let Ok(mount) = self.mounts.lookup(path) else {
            return;
        };
        let Some(stream) = mount.get_stream(index) else {
            return;
        };
        let sessions = self.sessions.clone();
        stream.broadcast_interleaved(payload, move |id| sessions.is_playing(id));
    }

    fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(SessionState::Init)
    }

    fn require_role_state(&self, role: Role, state: SessionState) -> Result<()> {
        if self.role == role && self.state() == state {
            Ok(())
        } else {
            Err(RtspError::MethodNotValidInThisState)
        }
    }

    fn validate_session_header(&self, request: &RtspRequest, session: &Session) -> Result<()> {
        let raw = request
            .get_header("Session")
            .ok_or_else(|| RtspError::SessionNotFound(String::new()))?;
        let id = raw.split(';').next().unwrap_or(raw).trim();
        if id != session.id {
            return Err(RtspError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    fn handle_options(&self) -> RtspResponse {
        let methods = if self.role == Role::Client {
            "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER, SET_PARAMETER"
        } else {
            "OPTIONS, DESCRIBE, ANNOUNCE, SETUP, RECORD, PLAY, PAUSE, TEARDOWN, GET_PARAMETER, SET_PARAMETER"
        };
        RtspResponse::ok().add_header("Public", methods)
    }

    fn handle_announce(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        if self.role == Role::Client || self.state() != SessionState::Init {
            return Err(RtspError::MethodNotValidInThisState);
        }

        let path = mount::normalize_mount_path(&request.uri);
        let sdp = request.body_as_str()?;
        if sdp.trim().is_empty() {
            return Err(RtspError::ProtocolViolation {
                kind: ParseErrorKind::TruncatedBody,
            });
        }
        let sdp = sdp.to_string();

        self.mounts
            .create(&path, sdp)
            .map_err(|err| match err {
                RtspError::AlreadyExists(p) => RtspError::Forbidden(p),
                other => other,
            })?;

        self.role = Role::Source;
        self.mount_path = Some(path);
        Ok(RtspResponse::ok())
    }

    fn handle_describe(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let path = mount::normalize_mount_path(&request.uri);
        let mount = self.mounts.lookup(&path)?;
        if !mount.is_mounted() {
            return Err(RtspError::NotFound(path));
        }

        if self.role == Role::Unknown {
            self.role = Role::Client;
            self.mount_path = Some(path);
        }

        Ok(RtspResponse::ok()
            .add_header("Content-Type", "application/sdp")
            .with_body(mount.sdp().into_bytes()))
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        if self.role == Role::Unknown {
            self.role = Role::Client;
        }
        if !matches!(self.state(), SessionState::Init | SessionState::Ready) {
            return Err(RtspError::MethodNotValidInThisState);
        }

        let path = self
            .mount_path
            .clone()
            .unwrap_or_else(|| mount::normalize_mount_path(&request.uri));
        let mount = self.mounts.lookup(&path)?;
        if self.role == Role::Client && !mount.is_mounted() {
            return Err(RtspError::NotFound(path));
        }

        let index = mount::stream_index_from_uri(&request.uri);
        let stream = mount.get_or_create_stream(index, &self.port_allocator)?;

        let transport_header = request.get_header("Transport").ok_or(RtspError::ProtocolViolation {
            kind: ParseErrorKind::InvalidHeader,
        })?;

        let session = self.session.clone().unwrap_or_else(|| {
            let session = self.sessions.create_session();
            session.set_role(self.role);
            session
        });
        if self.session.is_none() {
            self.mount_path = Some(path);
            if self.role == Role::Source {
                mount.set_source_session_id(&session.id);
            }
            self.session = Some(session.clone());
        }

        let response_transport = if let Some((rtp_chan, rtcp_chan)) =
            parse_interleaved_channels(transport_header)
        {
            self.channel_to_stream.insert(rtp_chan, index);
            if self.role == Role::Source {
                stream.set_source_interleaved_channel(rtp_chan);
            } else {
                stream.add_subscriber(Subscriber::new(
                    session.id.clone(),
                    SubscriberTransport::Interleaved {
                        rtp_channel: rtp_chan,
                    },
                    &self.handle,
                ));
            }
            format!("RTP/AVP/TCP;interleaved={rtp_chan}-{rtcp_chan}")
        } else if self.role == Role::Client {
            let (client_rtp, client_rtcp) =
                parse_client_port(transport_header).ok_or(RtspError::ProtocolViolation {
                    kind: ParseErrorKind::InvalidHeader,
                })?;
            let dest = SocketAddr::new(self.peer_addr.ip(), client_rtp);
            stream.add_subscriber(Subscriber::new(
                session.id.clone(),
                SubscriberTransport::Udp { dest },
                &self.handle,
            ));
            format!(
                "RTP/AVP;unicast;client_port={client_rtp}-{client_rtcp};server_port={}-{}",
                stream.rtp_port, stream.rtcp_port
            )
        } else {
            format!(
                "RTP/AVP;unicast;server_port={}-{}",
                stream.rtp_port, stream.rtcp_port
            )
        };

        session.set_state(SessionState::Ready);

        Ok(RtspResponse::ok()
            .add_header("Transport", &response_transport)
            .add_header("Session", &session.header_value()))
    }

    fn handle_record(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        self.require_role_state(Role::Source, SessionState::Ready)?;
        let session = self.session.clone().ok_or_else(|| RtspError::SessionNotFound(String::new()))?;
        self.validate_session_header(request, &session)?;

        let path = self
            .mount_path
            .clone()
            .ok_or_else(|| RtspError::NotFound(request.uri.clone()))?;
        let mount = self.mounts.lookup(&path)?;

        for stream in mount.streams() {
            if stream.source_interleaved_channel().is_some() {
                continue;
            }
            let Some(socket) = stream.take_rtp_socket() else {
                continue;
            };
            let sessions = self.sessions.clone();
            let listener = RtpListenerHandle::spawn(socket, stream.clone(), move |id| {
                sessions.is_playing(id)
            })?;
            stream.set_listener(listener);
        }

        mount.mark_recording(self.peer_addr.ip().to_string());
        session.set_state(SessionState::Recording);

        Ok(RtspResponse::ok().add_header("Session", &session.header_value()))
    }

    fn handle_play(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        self.require_role_state(Role::Client, SessionState::Ready)?;
        let session = self.session.clone().ok_or_else(|| RtspError::SessionNotFound(String::new()))?;
        self.validate_session_header(request, &session)?;
        session.set_state(SessionState::Playing);
        Ok(RtspResponse::ok()
            .add_header("Session", &session.header_value())
            .add_header("Range", "npt=0.000-"))
    }

    fn handle_pause(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        self.require_role_state(Role::Client, SessionState::Playing)?;
        let session = self.session.clone().ok_or_else(|| RtspError::SessionNotFound(String::new()))?;
        self.validate_session_header(request, &session)?;
        session.set_state(SessionState::Ready);
        Ok(RtspResponse::ok().add_header("Session", &session.header_value()))
    }

    fn handle_teardown(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        if let Some(session) = self.session.clone() {
            self.validate_session_header(request, &session)?;
        }
        let header = self.session.as_ref().map(|s| s.header_value());
        self.teardown();
        let mut response = RtspResponse::ok();
        if let Some(header) = header {
            response = response.add_header("Session", &header);
        }
        Ok(response)
    }

    /// Idempotent cleanup, run exactly once per connection (§4.3): on
    /// TEARDOWN, or on any terminal read/write failure in [`run`](Self::run).
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(path) = self.mount_path.clone() {
            if let Ok(mount) = self.mounts.lookup(&path) {
                self.teardown_mount(&mount);
            }
        }

        if let Some(session) = self.session.take() {
            self.sessions.remove(&session.id);
        }

        tracing::info!(peer = %self.peer_addr, "connection torn down");
    }

    fn teardown_mount(&self, mount: &Mount) {
        match self.role {
            Role::Source => {
                let owns = self
                    .session
                    .as_ref()
                    .is_some_and(|session| mount.owns(&session.id));
                if owns {
                    mount.stop_recording();
                    self.mounts.unmount(mount.path());
                }
            }
            Role::Client => {
                if let Some(session) = &self.session {
                    mount.unsubscribe(&session.id);
                }
            }
            Role::Unknown => {}
        }
    }
}
