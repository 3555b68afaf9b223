use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_at_least, new_packet, packet_seq, read_i64, read_u32, read_u8, route,
    HEAD_BYTES,
};
use crate::errors::{LinkError, LinkResult};
use crate::session::Kind;

const MULTICAST_MIN_BYTES: usize = HEAD_BYTES + 1 + 4;

/// Protocol: size + header + route + seq + kind + n + targets (i64 * n) +
/// message. A pure fire-and-forget operation; no response is produced.
pub fn encode_multicast_req(seq: u64, kind: Kind, targets: &[i64], message: &[u8]) -> Vec<u8> {
    let total = MULTICAST_MIN_BYTES + targets.len() * 8 + message.len();
    let mut buf = new_packet(total, route::MULTICAST, seq);

    buf.write_u8(kind.to_u8())
        .expect("Error writing multicast request");
    buf.write_u32::<BigEndian>(targets.len() as u32)
        .expect("Error writing multicast request");
    for &target in targets {
        buf.write_i64::<BigEndian>(target)
            .expect("Error writing multicast request");
    }
    buf.extend_from_slice(message);

    buf
}

pub fn decode_multicast_req(data: &[u8]) -> LinkResult<(u64, Kind, Vec<i64>, Vec<u8>)> {
    check_at_least(data, MULTICAST_MIN_BYTES)?;

    let mut reader = body_reader(data);
    let kind = Kind::from_u8(read_u8(&mut reader)?).ok_or(LinkError::InvalidMessage)?;
    let count = read_u32(&mut reader)? as usize;

    check_at_least(data, MULTICAST_MIN_BYTES + count * 8)?;

    let mut targets = Vec::with_capacity(count);
    for _ in 0..count {
        targets.push(read_i64(&mut reader)?);
    }

    Ok((
        packet_seq(data),
        kind,
        targets,
        data[MULTICAST_MIN_BYTES + count * 8..].to_vec(),
    ))
}
