use crate::error::RtspError;

/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Uses a builder pattern — chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present.
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = "rtsp-relay/0.1";

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK — success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 400 Bad Request — malformed request or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 403 Forbidden — ANNOUNCE/RECORD rejected (path already owned, §4.2).
    pub fn forbidden() -> Self {
        Self::new(403, "Forbidden")
    }

    /// 404 Not Found — the requested mount does not exist.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 454 Session Not Found — missing, unknown, or mismatched `Session`.
    pub fn session_not_found() -> Self {
        Self::new(454, "Session Not Found")
    }

    /// 455 Method Not Valid In This State — transition not permitted (§4.2).
    pub fn method_not_valid() -> Self {
        Self::new(455, "Method Not Valid In This State")
    }

    /// 500 Internal Server Error — port allocation or other server fault.
    pub fn internal_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    /// 501 Not Implemented — unsupported method, state left unchanged.
    pub fn not_implemented() -> Self {
        Self::new(501, "Not Implemented")
    }

    /// Build a response directly from an [`RtspError`], using its mapped
    /// status code and reason phrase (§7).
    pub fn from_error(err: &RtspError) -> Self {
        Self::new(err.status_code(), err.reason_phrase())
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Echo the request's `CSeq` verbatim (mandatory on every response, §4.1/§6).
    /// Requests lacking `CSeq` are rejected before a response reaches this
    /// point, so callers that do have a CSeq should always use this.
    pub fn with_cseq(self, cseq: &str) -> Self {
        self.add_header("CSeq", cseq)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_text_body(self, body: String) -> Self {
        self.with_body(body.into_bytes())
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> Vec<u8> {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        let mut bytes = match &self.body {
            Some(body) => {
                response.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
                let mut bytes = response.into_bytes();
                bytes.extend_from_slice(body);
                bytes
            }
            None => {
                response.push_str("\r\n");
                response.into_bytes()
            }
        };
        bytes.shrink_to_fit();
        bytes
    }
}
