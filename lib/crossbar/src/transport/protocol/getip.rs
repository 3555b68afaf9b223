use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_at_least, check_exact, new_packet, packet_seq, read_i64, read_u16, read_u8,
    route, CODE_BYTES, HEAD_BYTES,
};
use crate::codes::Code;
use crate::errors::{LinkError, LinkResult};
use crate::session::Kind;

const GET_IP_REQ_BYTES: usize = HEAD_BYTES + 1 + 8;

/// Protocol: size + header + route + seq + kind + target
pub fn encode_get_ip_req(seq: u64, kind: Kind, target: i64) -> Vec<u8> {
    let mut buf = new_packet(GET_IP_REQ_BYTES, route::GET_IP, seq);

    buf.write_u8(kind.to_u8())
        .expect("Error writing get-ip request");
    buf.write_i64::<BigEndian>(target)
        .expect("Error writing get-ip request");

    buf
}

pub fn decode_get_ip_req(data: &[u8]) -> LinkResult<(u64, Kind, i64)> {
    check_exact(data, GET_IP_REQ_BYTES)?;

    let mut reader = body_reader(data);
    let kind = Kind::from_u8(read_u8(&mut reader)?).ok_or(LinkError::InvalidMessage)?;
    let target = read_i64(&mut reader)?;

    Ok((packet_seq(data), kind, target))
}

/// Protocol: size + header + route + seq + code + ip (u8 length prefixed)
pub fn encode_get_ip_res(seq: u64, code: Code, ip: &str) -> Vec<u8> {
    let total = HEAD_BYTES + CODE_BYTES + 1 + ip.len();
    let mut buf = new_packet(total, route::GET_IP, seq);

    buf.write_u16::<BigEndian>(code.to_u16())
        .expect("Error writing get-ip response");
    buf.write_u8(ip.len() as u8)
        .expect("Error writing get-ip response");
    buf.extend_from_slice(ip.as_bytes());

    buf
}

pub fn decode_get_ip_res(data: &[u8]) -> LinkResult<(Code, String)> {
    check_at_least(data, HEAD_BYTES + CODE_BYTES + 1)?;

    let len = data[HEAD_BYTES + CODE_BYTES] as usize;
    check_exact(data, HEAD_BYTES + CODE_BYTES + 1 + len)?;

    let mut reader = body_reader(data);
    let code = Code::from_u16(read_u16(&mut reader)?);
    let _ = read_u8(&mut reader)?;

    let start = HEAD_BYTES + CODE_BYTES + 1;
    let ip = String::from_utf8(data[start..start + len].to_vec())
        .map_err(|_| LinkError::InvalidMessage)?;

    Ok((code, ip))
}
