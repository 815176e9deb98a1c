//! Interleaved RTP/RTCP framing (RFC 2326 §10.12, §6 "Interleaved framing").
//!
//! ```text
//! 0x24 | channel (1 byte) | length (2 bytes, big-endian) | payload
//! ```
//!
//! The sentinel byte `0x24` (`'$'`) only appears between RTSP messages on a
//! connection that has negotiated interleaved transport (§4.1); elsewhere it
//! is a [`crate::error::RtspError::ProtocolViolation`].

pub const SENTINEL: u8 = 0x24;
/// Sentinel + channel + 2-byte length.
pub const HEADER_LEN: usize = 4;

/// Encode one interleaved frame for the wire.
pub fn encode(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(SENTINEL);
    frame.push(channel);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_rfc_framing() {
        let frame = encode(2, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(frame, vec![0x24, 0x02, 0x00, 0x03, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn encode_empty_payload() {
        let frame = encode(0, &[]);
        assert_eq!(frame, vec![0x24, 0x00, 0x00, 0x00]);
    }
}
