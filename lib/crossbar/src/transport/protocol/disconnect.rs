use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_exact, decode_code_res, encode_code_res, new_packet, packet_seq, read_i64,
    read_u8, route, HEAD_BYTES,
};
use crate::codes::Code;
use crate::errors::{LinkError, LinkResult};
use crate::session::Kind;

const DISCONNECT_REQ_BYTES: usize = HEAD_BYTES + 1 + 8 + 1;

/// Protocol: size + header + route + seq + kind + target + force
pub fn encode_disconnect_req(seq: u64, kind: Kind, target: i64, force: bool) -> Vec<u8> {
    let mut buf = new_packet(DISCONNECT_REQ_BYTES, route::DISCONNECT, seq);

    buf.write_u8(kind.to_u8())
        .expect("Error writing disconnect request");
    buf.write_i64::<BigEndian>(target)
        .expect("Error writing disconnect request");
    buf.write_u8(force as u8)
        .expect("Error writing disconnect request");

    buf
}

pub fn decode_disconnect_req(data: &[u8]) -> LinkResult<(u64, Kind, i64, bool)> {
    check_exact(data, DISCONNECT_REQ_BYTES)?;

    let mut reader = body_reader(data);
    let kind = Kind::from_u8(read_u8(&mut reader)?).ok_or(LinkError::InvalidMessage)?;
    let target = read_i64(&mut reader)?;
    let force = read_u8(&mut reader)? != 0;

    Ok((packet_seq(data), kind, target, force))
}

/// Protocol: size + header + route + seq + code. Only produced for requests
/// with a non-zero seq.
pub fn encode_disconnect_res(seq: u64, code: Code) -> Vec<u8> {
    encode_code_res(route::DISCONNECT, seq, code)
}

pub fn decode_disconnect_res(data: &[u8]) -> LinkResult<Code> {
    decode_code_res(data)
}
