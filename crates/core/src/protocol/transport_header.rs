//! Parsing for the `Transport` request header (RFC 2326 §12.39).
//!
//! Only the two parameters this relay negotiates are extracted:
//! `client_port=<rtp>-<rtcp>` for UDP unicast and `interleaved=<rtp>-<rtcp>`
//! for in-band TCP delivery. Everything else in the header (`RTP/AVP`,
//! `unicast`, `mode=record`, ...) is accepted but ignored.

/// Parse `client_port=<rtp>-<rtcp>` out of a `Transport` header value.
pub fn parse_client_port(header: &str) -> Option<(u16, u16)> {
    parse_port_pair(header, "client_port=")
}

/// Parse `interleaved=<rtp_channel>-<rtcp_channel>` out of a `Transport`
/// header value. Channels are small integers (0-255), not port numbers.
pub fn parse_interleaved_channels(header: &str) -> Option<(u8, u8)> {
    for field in header.split(';') {
        if let Some(value) = field.trim().strip_prefix("interleaved=") {
            let mut parts = value.splitn(2, '-');
            let first = parts.next()?.parse().ok()?;
            let second = parts.next().unwrap_or("").parse().unwrap_or(first + 1);
            return Some((first, second));
        }
    }
    None
}

fn parse_port_pair(header: &str, prefix: &str) -> Option<(u16, u16)> {
    for field in header.split(';') {
        if let Some(value) = field.trim().strip_prefix(prefix) {
            let mut parts = value.splitn(2, '-');
            let first = parts.next()?.parse().ok()?;
            let second = parts.next().unwrap_or("").parse().unwrap_or(first + 1);
            return Some((first, second));
        }
    }
    None
}
