use byteorder::{BigEndian, WriteBytesExt};

use super::{
    body_reader, check_exact, decode_code_res, encode_code_res, new_packet, packet_seq, read_u16,
    read_u8, route, CODE_BYTES, HEAD_BYTES,
};
use crate::cluster::State;
use crate::codes::Code;
use crate::errors::{LinkError, LinkResult};

const GET_STATE_REQ_BYTES: usize = HEAD_BYTES;
const GET_STATE_RES_BYTES: usize = HEAD_BYTES + CODE_BYTES + 1;
const SET_STATE_REQ_BYTES: usize = HEAD_BYTES + 1;

/// Protocol: size + header + route + seq
pub fn encode_get_state_req(seq: u64) -> Vec<u8> {
    new_packet(GET_STATE_REQ_BYTES, route::GET_STATE, seq)
}

pub fn decode_get_state_req(data: &[u8]) -> LinkResult<u64> {
    check_exact(data, GET_STATE_REQ_BYTES)?;

    Ok(packet_seq(data))
}

/// Protocol: size + header + route + seq + code + state
pub fn encode_get_state_res(seq: u64, code: Code, state: State) -> Vec<u8> {
    let mut buf = new_packet(GET_STATE_RES_BYTES, route::GET_STATE, seq);

    buf.write_u16::<BigEndian>(code.to_u16())
        .expect("Error writing get-state response");
    buf.write_u8(state.to_u8())
        .expect("Error writing get-state response");

    buf
}

pub fn decode_get_state_res(data: &[u8]) -> LinkResult<(Code, State)> {
    check_exact(data, GET_STATE_RES_BYTES)?;

    let mut reader = body_reader(data);
    let code = Code::from_u16(read_u16(&mut reader)?);
    let state = State::from_u8(read_u8(&mut reader)?).ok_or(LinkError::InvalidMessage)?;

    Ok((code, state))
}

/// Protocol: size + header + route + seq + state
pub fn encode_set_state_req(seq: u64, state: State) -> Vec<u8> {
    let mut buf = new_packet(SET_STATE_REQ_BYTES, route::SET_STATE, seq);

    buf.write_u8(state.to_u8())
        .expect("Error writing set-state request");

    buf
}

pub fn decode_set_state_req(data: &[u8]) -> LinkResult<(u64, State)> {
    check_exact(data, SET_STATE_REQ_BYTES)?;

    let mut reader = body_reader(data);
    let state = State::from_u8(read_u8(&mut reader)?).ok_or(LinkError::InvalidMessage)?;

    Ok((packet_seq(data), state))
}

/// Protocol: size + header + route + seq + code
pub fn encode_set_state_res(seq: u64, code: Code) -> Vec<u8> {
    encode_code_res(route::SET_STATE, seq, code)
}

pub fn decode_set_state_res(data: &[u8]) -> LinkResult<Code> {
    decode_code_res(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_state_roundtrip() {
        let buf = encode_get_state_req(10);

        assert_eq!(buf.len(), GET_STATE_REQ_BYTES);
        assert_eq!(decode_get_state_req(&buf).unwrap(), 10);

        let buf = encode_get_state_res(10, Code::Ok, State::Busy);

        assert_eq!(buf.len(), GET_STATE_RES_BYTES);
        assert_eq!(decode_get_state_res(&buf).unwrap(), (Code::Ok, State::Busy));
    }

    #[test]
    fn test_set_state_roundtrip() {
        let buf = encode_set_state_req(11, State::Hang);

        assert_eq!(buf.len(), SET_STATE_REQ_BYTES);
        assert_eq!(decode_set_state_req(&buf).unwrap(), (11, State::Hang));

        let buf = encode_set_state_res(11, Code::Ok);
        assert_eq!(decode_set_state_res(&buf).unwrap(), Code::Ok);
    }

    #[test]
    fn test_rejects_unknown_state() {
        let mut buf = encode_set_state_req(11, State::Work);
        buf[HEAD_BYTES] = 99;

        assert_eq!(
            decode_set_state_req(&buf).unwrap_err(),
            LinkError::InvalidMessage
        );
    }
}
