//! Raw IP frame framing: the little-endian `uint16` length prefix used on the
//! forwarding, PeX, and service wire protocols (spec §3 "Packet", §6).

use bytes::{Buf, BufMut, BytesMut};

/// Largest single IP frame the daemon will ever forward (spec §3).
pub const MTU: usize = 1420;

/// IP version nibble read out of the first octet of a frame (spec §4.3 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
    Other(u8),
}

impl IpVersion {
    pub fn of(first_byte: u8) -> Self {
        match first_byte & 0xf0 {
            0x40 => IpVersion::V4,
            0x60 => IpVersion::V6,
            other => IpVersion::Other(other),
        }
    }
}

/// Reads the destination address bytes out of a raw IPv4 or IPv6 frame.
///
/// Returns `None` for anything else (spec §4.3 step 2: "Anything else: drop").
pub fn destination_bytes(frame: &[u8]) -> Option<&[u8]> {
    if frame.is_empty() {
        return None;
    }
    match IpVersion::of(frame[0]) {
        IpVersion::V4 if frame.len() >= 20 => Some(&frame[16..20]),
        IpVersion::V6 if frame.len() >= 40 => Some(&frame[24..40]),
        _ => None,
    }
}

/// `true` if the frame's IP protocol/next-header field says TCP (protocol 6).
///
/// Used by the service-network classifier (spec §4.8) which only demuxes TCP.
pub fn is_tcp(frame: &[u8]) -> bool {
    match IpVersion::of(frame.first().copied().unwrap_or(0)) {
        IpVersion::V4 => frame.len() > 9 && frame[9] == 6,
        IpVersion::V6 => frame.len() > 6 && frame[6] == 6,
        IpVersion::Other(_) => false,
    }
}

/// Reads the destination TCP port out of a frame whose IP header length is
/// known to be `ip_header_len` bytes (20 for v4, 40 for v6 with no extension
/// headers).
pub fn tcp_dest_port(frame: &[u8], ip_header_len: usize) -> Option<u16> {
    let port_off = ip_header_len + 2;
    if frame.len() < port_off + 2 {
        return None;
    }
    Some(u16::from_be_bytes([frame[port_off], frame[port_off + 1]]))
}

/// Encodes `frame` onto `out` as `uint16 length little-endian` followed by the
/// frame bytes (spec §6 "Wire: forwarding protocol").
///
/// # Errors
/// Returns `Err` if `frame` exceeds [`MTU`] - the wire format cannot express it.
pub fn encode_frame(frame: &[u8], out: &mut BytesMut) -> Result<(), FrameTooLarge> {
    if frame.len() > MTU {
        return Err(FrameTooLarge(frame.len()));
    }
    out.put_u16_le(frame.len() as u16);
    out.put_slice(frame);
    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("frame of {0} bytes exceeds MTU of {MTU}")]
pub struct FrameTooLarge(pub usize);

/// Decodes one length-prefixed frame out of `buf`, if a complete one is
/// present. Leaves `buf` untouched if the frame is incomplete (normal framing
/// behaviour for a streaming decoder).
pub fn decode_frame(buf: &mut BytesMut) -> Option<BytesMut> {
    if buf.len() < 2 {
        return None;
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < 2 + len {
        return None;
    }
    buf.advance(2);
    Some(buf.split_to(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_encode_decode() {
        let frame = vec![0x45u8; 128];
        let mut wire = BytesMut::new();
        encode_frame(&frame, &mut wire).unwrap();

        // Simulate a short read: decode should refuse until the full frame arrives.
        let mut partial = wire.split_to(wire.len() - 1);
        assert!(decode_frame(&mut partial).is_none());

        let mut full = BytesMut::new();
        full.extend_from_slice(&partial);
        full.extend_from_slice(&wire);
        let decoded = decode_frame(&mut full).expect("complete frame");
        assert_eq!(&decoded[..], &frame[..]);
        assert!(full.is_empty());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let frame = vec![0u8; MTU + 1];
        let mut wire = BytesMut::new();
        assert!(encode_frame(&frame, &mut wire).is_err());
    }

    #[test]
    fn destination_bytes_handles_both_families_and_rejects_unknown() {
        let mut v4 = vec![0x45u8; 20];
        v4[16..20].copy_from_slice(&[10, 0, 0, 1]);
        assert_eq!(destination_bytes(&v4), Some(&[10, 0, 0, 1][..]));

        let mut v6 = vec![0x60u8; 40];
        v6[24..40].copy_from_slice(&[0xfdu8; 16]);
        assert_eq!(destination_bytes(&v6), Some(&[0xfdu8; 16][..]));

        assert_eq!(destination_bytes(&[0x00]), None);
    }
}
