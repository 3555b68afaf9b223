use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_exact, new_packet, packet_seq, read_i64, read_u16, read_u8, route,
    CODE_BYTES, HEAD_BYTES,
};
use crate::codes::Code;
use crate::errors::{LinkError, LinkResult};
use crate::session::Kind;

const IS_ONLINE_REQ_BYTES: usize = HEAD_BYTES + 1 + 8;
const IS_ONLINE_RES_BYTES: usize = HEAD_BYTES + CODE_BYTES + 1;

/// Protocol: size + header + route + seq + kind + target
pub fn encode_is_online_req(seq: u64, kind: Kind, target: i64) -> Vec<u8> {
    let mut buf = new_packet(IS_ONLINE_REQ_BYTES, route::IS_ONLINE, seq);

    buf.write_u8(kind.to_u8())
        .expect("Error writing is-online request");
    buf.write_i64::<BigEndian>(target)
        .expect("Error writing is-online request");

    buf
}

pub fn decode_is_online_req(data: &[u8]) -> LinkResult<(u64, Kind, i64)> {
    check_exact(data, IS_ONLINE_REQ_BYTES)?;

    let mut reader = body_reader(data);
    let kind = Kind::from_u8(read_u8(&mut reader)?).ok_or(LinkError::InvalidMessage)?;
    let target = read_i64(&mut reader)?;

    Ok((packet_seq(data), kind, target))
}

/// Protocol: size + header + route + seq + code + online (0/1)
pub fn encode_is_online_res(seq: u64, code: Code, online: bool) -> Vec<u8> {
    let mut buf = new_packet(IS_ONLINE_RES_BYTES, route::IS_ONLINE, seq);

    buf.write_u16::<BigEndian>(code.to_u16())
        .expect("Error writing is-online response");
    buf.write_u8(online as u8)
        .expect("Error writing is-online response");

    buf
}

pub fn decode_is_online_res(data: &[u8]) -> LinkResult<(Code, bool)> {
    check_exact(data, IS_ONLINE_RES_BYTES)?;

    let mut reader = body_reader(data);
    let code = Code::from_u16(read_u16(&mut reader)?);
    let online = read_u8(&mut reader)? != 0;

    Ok((code, online))
}
