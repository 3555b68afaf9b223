use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_exact, new_packet, packet_seq, read_i64, read_u16, read_u8, route,
    CODE_BYTES, HEAD_BYTES,
};
use crate::codes::Code;
use crate::errors::{LinkError, LinkResult};
use crate::session::Kind;

const STAT_REQ_BYTES: usize = HEAD_BYTES + 1;
const STAT_RES_BYTES: usize = HEAD_BYTES + CODE_BYTES + 8;

/// Protocol: size + header + route + seq + kind
pub fn encode_stat_req(seq: u64, kind: Kind) -> Vec<u8> {
    let mut buf = new_packet(STAT_REQ_BYTES, route::STAT, seq);

    buf.write_u8(kind.to_u8()).expect("Error writing stat request");

    buf
}

pub fn decode_stat_req(data: &[u8]) -> LinkResult<(u64, Kind)> {
    check_exact(data, STAT_REQ_BYTES)?;

    let mut reader = body_reader(data);
    let kind = Kind::from_u8(read_u8(&mut reader)?).ok_or(LinkError::InvalidMessage)?;

    Ok((packet_seq(data), kind))
}

/// Protocol: size + header + route + seq + code + total
pub fn encode_stat_res(seq: u64, code: Code, total: i64) -> Vec<u8> {
    let mut buf = new_packet(STAT_RES_BYTES, route::STAT, seq);

    buf.write_u16::<BigEndian>(code.to_u16())
        .expect("Error writing stat response");
    buf.write_i64::<BigEndian>(total)
        .expect("Error writing stat response");

    buf
}

pub fn decode_stat_res(data: &[u8]) -> LinkResult<(Code, i64)> {
    check_exact(data, STAT_RES_BYTES)?;

    let mut reader = body_reader(data);
    let code = Code::from_u16(read_u16(&mut reader)?);
    let total = read_i64(&mut reader)?;

    Ok((code, total))
}
