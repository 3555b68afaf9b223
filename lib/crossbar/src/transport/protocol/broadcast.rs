use byteorder::WriteBytesExt;

use super::{body_reader, check_at_least, new_packet, packet_seq, read_u8, route, HEAD_BYTES};
use crate::errors::{LinkError, LinkResult};
use crate::session::Kind;

const BROADCAST_MIN_BYTES: usize = HEAD_BYTES + 1;

/// Protocol: size + header + route + seq + kind + message. A pure
/// fire-and-forget operation; no response is produced.
pub fn encode_broadcast_req(seq: u64, kind: Kind, message: &[u8]) -> Vec<u8> {
    let mut buf = new_packet(BROADCAST_MIN_BYTES + message.len(), route::BROADCAST, seq);

    buf.write_u8(kind.to_u8())
        .expect("Error writing broadcast request");
    buf.extend_from_slice(message);

    buf
}

pub fn decode_broadcast_req(data: &[u8]) -> LinkResult<(u64, Kind, Vec<u8>)> {
    check_at_least(data, BROADCAST_MIN_BYTES)?;

    let mut reader = body_reader(data);
    let kind = Kind::from_u8(read_u8(&mut reader)?).ok_or(LinkError::InvalidMessage)?;

    Ok((packet_seq(data), kind, data[BROADCAST_MIN_BYTES..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let buf = encode_broadcast_req(0, Kind::User, b"to-everyone");

        assert_eq!(buf.len(), BROADCAST_MIN_BYTES + 11);

        let (seq, kind, message) = decode_broadcast_req(&buf).unwrap();
        assert_eq!(seq, 0);
        assert_eq!(kind, Kind::User);
        assert_eq!(message, b"to-everyone");
    }

    #[test]
    fn test_rejects_truncated() {
        assert_eq!(
            decode_broadcast_req(&[0; BROADCAST_MIN_BYTES - 1]).unwrap_err(),
            LinkError::InvalidMessage
        );
    }
}
