use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_exact, decode_code_res, encode_code_res, new_packet, packet_seq, read_i64,
    route, CODE_BYTES, HEAD_BYTES,
};
use crate::codes::Code;
use crate::errors::LinkResult;

const BIND_REQ_BYTES: usize = HEAD_BYTES + 8 + 8;
const BIND_RES_BYTES: usize = HEAD_BYTES + CODE_BYTES;

/// Protocol: size + header + route + seq + cid + uid
pub fn encode_bind_req(seq: u64, cid: i64, uid: i64) -> Vec<u8> {
    let mut buf = new_packet(BIND_REQ_BYTES, route::BIND, seq);

    buf.write_i64::<BigEndian>(cid)
        .expect("Error writing bind request");
    buf.write_i64::<BigEndian>(uid)
        .expect("Error writing bind request");

    buf
}

pub fn decode_bind_req(data: &[u8]) -> LinkResult<(u64, i64, i64)> {
    check_exact(data, BIND_REQ_BYTES)?;

    let mut reader = body_reader(data);
    let cid = read_i64(&mut reader)?;
    let uid = read_i64(&mut reader)?;

    Ok((packet_seq(data), cid, uid))
}

/// Protocol: size + header + route + seq + code
pub fn encode_bind_res(seq: u64, code: Code) -> Vec<u8> {
    encode_code_res(route::BIND, seq, code)
}

pub fn decode_bind_res(data: &[u8]) -> LinkResult<Code> {
    decode_code_res(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LinkError;

    #[test]
    fn test_req_roundtrip() {
        let buf = encode_bind_req(1, 7, 42);

        assert_eq!(buf.len(), BIND_REQ_BYTES);
        assert_eq!(decode_bind_req(&buf).unwrap(), (1, 7, 42));
    }

    #[test]
    fn test_res_roundtrip() {
        let buf = encode_bind_res(1, Code::Ok);

        assert_eq!(buf.len(), BIND_RES_BYTES);
        assert_eq!(decode_bind_res(&buf).unwrap(), Code::Ok);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let buf = encode_bind_req(1, 7, 42);

        assert_eq!(
            decode_bind_req(&buf[..buf.len() - 1]).unwrap_err(),
            LinkError::InvalidMessage
        );
    }
}
