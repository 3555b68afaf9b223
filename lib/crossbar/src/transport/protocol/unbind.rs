use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_exact, decode_code_res, encode_code_res, new_packet, packet_seq, read_i64,
    route, HEAD_BYTES,
};
use crate::codes::Code;
use crate::errors::LinkResult;

const UNBIND_REQ_BYTES: usize = HEAD_BYTES + 8;

/// Protocol: size + header + route + seq + uid
pub fn encode_unbind_req(seq: u64, uid: i64) -> Vec<u8> {
    let mut buf = new_packet(UNBIND_REQ_BYTES, route::UNBIND, seq);

    buf.write_i64::<BigEndian>(uid)
        .expect("Error writing unbind request");

    buf
}

pub fn decode_unbind_req(data: &[u8]) -> LinkResult<(u64, i64)> {
    check_exact(data, UNBIND_REQ_BYTES)?;

    let mut reader = body_reader(data);
    let uid = read_i64(&mut reader)?;

    Ok((packet_seq(data), uid))
}

/// Protocol: size + header + route + seq + code
pub fn encode_unbind_res(seq: u64, code: Code) -> Vec<u8> {
    encode_code_res(route::UNBIND, seq, code)
}

pub fn decode_unbind_res(data: &[u8]) -> LinkResult<Code> {
    decode_code_res(data)
}
