//! Error types for the RTSP relay server library.

use std::fmt;

/// Errors that can occur in the RTSP relay server library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`ProtocolViolation`](Self::ProtocolViolation),
///   [`UnsupportedVersion`](Self::UnsupportedVersion).
/// - **Connection lifecycle**: [`PeerClosed`](Self::PeerClosed) (clean EOF,
///   not a failure on its own), [`PeerReset`](Self::PeerReset) (EOF mid-message).
/// - **Registry**: [`NotFound`](Self::NotFound), [`AlreadyExists`](Self::AlreadyExists).
/// - **Session/state machine**: [`MethodNotValidInThisState`](Self::MethodNotValidInThisState),
///   [`Forbidden`](Self::Forbidden), [`SessionNotFound`](Self::SessionNotFound).
/// - **Resources**: [`ResourceExhausted`](Self::ResourceExhausted) (RTP port range full).
/// - **Transport**: [`Io`](Self::Io).
/// - **Startup**: [`Config`](Self::Config).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Malformed start line, bad header, or truncated body (RFC 2326 §6).
    #[error("protocol violation: {kind}")]
    ProtocolViolation { kind: ParseErrorKind },

    /// Request line named a version other than `RTSP/1.0`.
    #[error("unsupported RTSP version: {0}")]
    UnsupportedVersion(String),

    /// Clean EOF between messages. Not a failure — the peer simply hung up.
    #[error("peer closed the connection")]
    PeerClosed,

    /// EOF in the middle of reading a message.
    #[error("peer reset the connection mid-message")]
    PeerReset,

    /// No mount registered at the requested path.
    #[error("mount not found: {0}")]
    NotFound(String),

    /// ANNOUNCE on a path that already has a Mount (mounted or not).
    #[error("mount already exists: {0}")]
    AlreadyExists(String),

    /// Request method is not valid given the connection's current
    /// (role, state) pair.
    #[error("method not valid in this state")]
    MethodNotValidInThisState,

    /// ANNOUNCE rejected because the path is already owned by another source.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// `Session` header missing, unknown, or not owned by this connection.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// RTP port allocator exhausted its configured range.
    #[error("RTP port range exhausted")]
    ResourceExhausted,

    /// Underlying socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be read or parsed at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RtspError {
    /// Maps this error onto the RTSP status code it produces on the wire
    /// (§7): protocol and session errors become a response on the same
    /// connection rather than tearing it down.
    pub fn status_code(&self) -> u16 {
        match self {
            RtspError::ProtocolViolation { .. } => 400,
            RtspError::UnsupportedVersion(_) => 400,
            RtspError::NotFound(_) => 404,
            RtspError::AlreadyExists(_) | RtspError::Forbidden(_) => 403,
            RtspError::MethodNotValidInThisState => 455,
            RtspError::SessionNotFound(_) => 454,
            RtspError::ResourceExhausted => 500,
            RtspError::PeerClosed | RtspError::PeerReset | RtspError::Io(_) => 500,
            RtspError::Config(_) => 500,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            RtspError::ProtocolViolation { .. } | RtspError::UnsupportedVersion(_) => {
                "Bad Request"
            }
            RtspError::NotFound(_) => "Not Found",
            RtspError::AlreadyExists(_) | RtspError::Forbidden(_) => "Forbidden",
            RtspError::MethodNotValidInThisState => "Method Not Valid In This State",
            RtspError::SessionNotFound(_) => "Session Not Found",
            RtspError::ResourceExhausted => "Internal Server Error",
            RtspError::PeerClosed | RtspError::PeerReset | RtspError::Io(_) => {
                "Internal Server Error"
            }
            RtspError::Config(_) => "Internal Server Error",
        }
    }
}

/// Specific kind of RTSP parse failure, folded into
/// [`RtspError::ProtocolViolation`].
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` promised more body bytes than the socket delivered.
    TruncatedBody,
    /// An interleaved frame sentinel (`0x24`) appeared on a connection that
    /// has not negotiated interleaved mode.
    UnexpectedInterleavedFrame,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::TruncatedBody => write!(f, "truncated body"),
            Self::UnexpectedInterleavedFrame => write!(f, "unexpected interleaved frame"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
