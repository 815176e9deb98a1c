use crate::error::{ParseErrorKind, Result, RtspError};

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The body, when
/// present, is read separately by the caller according to `Content-Length`
/// (§4.1) and attached via [`RtspRequest::with_body`].
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, ANNOUNCE, RECORD, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/streamid=0`).
    pub uri: String,
    /// Protocol version as received. Always `"RTSP/1.0"` — `parse_head`
    /// rejects anything else with `UnsupportedVersion` before constructing
    /// this struct.
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Request body, present when `Content-Length` was non-zero.
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Parse the request line and headers from their text representation.
    /// Does not read a body — the caller reads exactly `Content-Length`
    /// bytes afterward and attaches them with [`with_body`](Self::with_body).
    pub fn parse_head(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines.next().ok_or(RtspError::ProtocolViolation {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(RtspError::ProtocolViolation {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            return Err(RtspError::UnsupportedVersion(version));
        }

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                continue;
            }

            let colon_pos = line.find(':').ok_or(RtspError::ProtocolViolation {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers,
            body: Vec::new(),
        })
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// `Content-Length` header, parsed as a byte count (0 when absent).
    pub fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn body_as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).map_err(|_| RtspError::ProtocolViolation {
            kind: ParseErrorKind::TruncatedBody,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/test RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse_head(raw).unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:8554/test");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/test/streamid=0 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse_head(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(req.cseq(), Some("3"));
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn parse_empty_request() {
        assert!(RtspRequest::parse_head("").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse_head("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn parse_rejects_unsupported_version() {
        let raw = "OPTIONS rtsp://localhost/test RTSP/2.0\r\nCSeq: 1\r\n\r\n";
        assert!(matches!(
            RtspRequest::parse_head(raw).unwrap_err(),
            RtspError::UnsupportedVersion(v) if v == "RTSP/2.0"
        ));
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse_head(raw).unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("cseq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn content_length_defaults_to_zero() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse_head(raw).unwrap();
        assert_eq!(req.content_length(), 0);
    }

    #[test]
    fn body_round_trips_as_utf8() {
        let raw = "ANNOUNCE rtsp://localhost/live RTSP/1.0\r\nCSeq: 1\r\nContent-Length: 5\r\n\r\n";
        let req = RtspRequest::parse_head(raw)
            .unwrap()
            .with_body(b"v=0\r\n".to_vec());
        assert_eq!(req.body_as_str().unwrap(), "v=0\r\n");
    }
}
