//! SDP (Session Description Protocol, RFC 4566) passthrough helpers.
//!
//! The relay never generates or rewrites SDP: a Source's ANNOUNCE body is
//! stored verbatim on its [`Mount`](crate::mount::Mount) and handed back
//! byte-for-byte on a Client's DESCRIBE (§6). The only thing this server
//! needs to know about the SDP's own structure is how many `m=` lines it
//! declares, since that determines how many streams RECORD should expect.

/// Count `m=` media description lines (RFC 4566 §5.14), one per stream.
///
/// Per the SDP grammar these must appear at the start of a line; a `m=`
/// occurring mid-line (e.g. inside an unrelated attribute value) does not
/// count.
pub fn count_media_lines(sdp: &str) -> usize {
    sdp.lines().filter(|line| line.starts_with("m=")).count()
}
