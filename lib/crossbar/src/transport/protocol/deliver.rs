use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_at_least, decode_code_res, encode_code_res, new_packet, packet_seq,
    read_i64, route, HEAD_BYTES,
};
use crate::codes::Code;
use crate::errors::LinkResult;

const DELIVER_MIN_BYTES: usize = HEAD_BYTES + 8 + 8;

/// Protocol: size + header + route + seq + cid + uid + message
pub fn encode_deliver_req(seq: u64, cid: i64, uid: i64, message: &[u8]) -> Vec<u8> {
    let mut buf = new_packet(DELIVER_MIN_BYTES + message.len(), route::DELIVER, seq);

    buf.write_i64::<BigEndian>(cid)
        .expect("Error writing deliver request");
    buf.write_i64::<BigEndian>(uid)
        .expect("Error writing deliver request");
    buf.extend_from_slice(message);

    buf
}

pub fn decode_deliver_req(data: &[u8]) -> LinkResult<(u64, i64, i64, Vec<u8>)> {
    check_at_least(data, DELIVER_MIN_BYTES)?;

    let mut reader = body_reader(data);
    let cid = read_i64(&mut reader)?;
    let uid = read_i64(&mut reader)?;

    Ok((
        packet_seq(data),
        cid,
        uid,
        data[DELIVER_MIN_BYTES..].to_vec(),
    ))
}

/// Protocol: size + header + route + seq + code
pub fn encode_deliver_res(seq: u64, code: Code) -> Vec<u8> {
    encode_code_res(route::DELIVER, seq, code)
}

pub fn decode_deliver_res(data: &[u8]) -> LinkResult<Code> {
    decode_code_res(data)
}
