use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_exact, decode_code_res, encode_code_res, new_packet, packet_seq, read_i32,
    read_i64, route, HEAD_BYTES,
};
use crate::codes::Code;
use crate::errors::LinkResult;

const TRIGGER_REQ_BYTES: usize = HEAD_BYTES + 4 + 8 + 8;

/// Protocol: size + header + route + seq + event + cid + uid
pub fn encode_trigger_req(seq: u64, event: i32, cid: i64, uid: i64) -> Vec<u8> {
    let mut buf = new_packet(TRIGGER_REQ_BYTES, route::TRIGGER, seq);

    buf.write_i32::<BigEndian>(event)
        .expect("Error writing trigger request");
    buf.write_i64::<BigEndian>(cid)
        .expect("Error writing trigger request");
    buf.write_i64::<BigEndian>(uid)
        .expect("Error writing trigger request");

    buf
}

pub fn decode_trigger_req(data: &[u8]) -> LinkResult<(u64, i32, i64, i64)> {
    check_exact(data, TRIGGER_REQ_BYTES)?;

    let mut reader = body_reader(data);
    let event = read_i32(&mut reader)?;
    let cid = read_i64(&mut reader)?;
    let uid = read_i64(&mut reader)?;

    Ok((packet_seq(data), event, cid, uid))
}

/// Protocol: size + header + route + seq + code
pub fn encode_trigger_res(seq: u64, code: Code) -> Vec<u8> {
    encode_code_res(route::TRIGGER, seq, code)
}

pub fn decode_trigger_res(data: &[u8]) -> LinkResult<Code> {
    decode_code_res(data)
}
