use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_at_least, new_packet, packet_seq, read_i64, read_u8, route, HEAD_BYTES,
};
use crate::errors::{LinkError, LinkResult};
use crate::session::Kind;

const PUSH_MIN_BYTES: usize = HEAD_BYTES + 1 + 8;

/// Protocol: size + header + route + seq + kind + target + message. A pure
/// fire-and-forget operation; no response is produced.
pub fn encode_push_req(seq: u64, kind: Kind, target: i64, message: &[u8]) -> Vec<u8> {
    let mut buf = new_packet(PUSH_MIN_BYTES + message.len(), route::PUSH, seq);

    buf.write_u8(kind.to_u8()).expect("Error writing push request");
    buf.write_i64::<BigEndian>(target)
        .expect("Error writing push request");
    buf.extend_from_slice(message);

    buf
}

pub fn decode_push_req(data: &[u8]) -> LinkResult<(u64, Kind, i64, Vec<u8>)> {
    check_at_least(data, PUSH_MIN_BYTES)?;

    let mut reader = body_reader(data);
    let kind = Kind::from_u8(read_u8(&mut reader)?).ok_or(LinkError::InvalidMessage)?;
    let target = read_i64(&mut reader)?;

    Ok((
        packet_seq(data),
        kind,
        target,
        data[PUSH_MIN_BYTES..].to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let buf = encode_push_req(0, Kind::User, 42, b"hello");

        assert_eq!(buf.len(), PUSH_MIN_BYTES + 5);

        let (seq, kind, target, message) = decode_push_req(&buf).unwrap();
        assert_eq!(seq, 0);
        assert_eq!(kind, Kind::User);
        assert_eq!(target, 42);
        assert_eq!(message, b"hello");
    }

    #[test]
    fn test_empty_message() {
        let buf = encode_push_req(0, Kind::Conn, 7, &[]);

        let (_, _, _, message) = decode_push_req(&buf).unwrap();
        assert!(message.is_empty());
    }

    #[test]
    fn test_rejects_truncated() {
        assert_eq!(
            decode_push_req(&[0; PUSH_MIN_BYTES - 1]).unwrap_err(),
            LinkError::InvalidMessage
        );
    }
}
