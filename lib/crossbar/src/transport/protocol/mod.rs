//! Wire codecs for the inter-instance protocol.
//!
//! Packet layout: `size:u32 | header:u8 | route:u8 | seq:u64 | body`, all
//! integers big-endian, `size` excluding its own four bytes. A header byte
//! with the data bit clear denotes a heartbeat and carries no route, seq or
//! body. `seq = 0` marks a fire-and-forget request that expects no response.

pub mod bind;
pub mod broadcast;
pub mod deliver;
pub mod disconnect;
pub mod getip;
pub mod multicast;
pub mod online;
pub mod push;
pub mod stat;
pub mod state;
pub mod trigger;
pub mod unbind;

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::codes::Code;
use crate::errors::{LinkError, LinkResult};

pub const SIZE_BYTES: usize = 4;
pub const HEADER_BYTES: usize = 1;
pub const ROUTE_BYTES: usize = 1;
pub const SEQ_BYTES: usize = 8;
pub const CODE_BYTES: usize = 2;

/// Offset of the body within a data packet.
pub const HEAD_BYTES: usize = SIZE_BYTES + HEADER_BYTES + ROUTE_BYTES + SEQ_BYTES;

/// Header bit marking a data packet; a clear bit means heartbeat.
pub const DATA_BIT: u8 = 1 << 7;

/// Hard cap on a single frame, size field included. Peers emitting larger
/// frames get their connection closed.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Route bytes of the protocol operations.
pub mod route {
    pub const BIND: u8 = 1;
    pub const UNBIND: u8 = 2;
    pub const GET_IP: u8 = 3;
    pub const STAT: u8 = 4;
    pub const IS_ONLINE: u8 = 5;
    pub const DISCONNECT: u8 = 6;
    pub const PUSH: u8 = 7;
    pub const MULTICAST: u8 = 8;
    pub const BROADCAST: u8 = 9;
    pub const GET_STATE: u8 = 10;
    pub const SET_STATE: u8 = 11;
    pub const DELIVER: u8 = 12;
    pub const TRIGGER: u8 = 13;
}

/// A heartbeat frame: the size field plus a lone header byte.
#[inline]
pub fn heartbeat_packet() -> Vec<u8> {
    vec![0, 0, 0, 1, 0]
}

/// Route byte of a data packet.
#[inline]
pub(crate) fn packet_route(data: &[u8]) -> u8 {
    data[SIZE_BYTES + HEADER_BYTES]
}

/// Sequence number of a data packet.
#[inline]
pub(crate) fn packet_seq(data: &[u8]) -> u64 {
    BigEndian::read_u64(&data[SIZE_BYTES + HEADER_BYTES + ROUTE_BYTES..HEAD_BYTES])
}

/// Allocates a packet and writes the head for the given body route and seq.
pub(crate) fn new_packet(total: usize, route: u8, seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(total);

    buf.write_u32::<BigEndian>((total - SIZE_BYTES) as u32)
        .expect("Error writing packet head");
    buf.write_u8(DATA_BIT).expect("Error writing packet head");
    buf.write_u8(route).expect("Error writing packet head");
    buf.write_u64::<BigEndian>(seq)
        .expect("Error writing packet head");

    buf
}

/// Encodes a response carrying only a status code.
/// Protocol: size + header + route + seq + code
pub(crate) fn encode_code_res(route: u8, seq: u64, code: Code) -> Vec<u8> {
    let mut buf = new_packet(HEAD_BYTES + CODE_BYTES, route, seq);

    buf.write_u16::<BigEndian>(code.to_u16())
        .expect("Error writing response code");

    buf
}

/// Decodes a response carrying only a status code.
pub(crate) fn decode_code_res(data: &[u8]) -> LinkResult<Code> {
    check_exact(data, HEAD_BYTES + CODE_BYTES)?;

    let mut reader = body_reader(data);

    Ok(Code::from_u16(read_u16(&mut reader)?))
}

pub(crate) type Reader<'a> = Cursor<&'a [u8]>;

/// Verifies the exact packet length of a fixed-size operation.
#[inline]
pub(crate) fn check_exact(data: &[u8], total: usize) -> LinkResult<()> {
    if data.len() != total {
        return Err(LinkError::InvalidMessage);
    }

    Ok(())
}

/// Verifies the minimum packet length of a variable-size operation.
#[inline]
pub(crate) fn check_at_least(data: &[u8], min: usize) -> LinkResult<()> {
    if data.len() < min {
        return Err(LinkError::InvalidMessage);
    }

    Ok(())
}

/// A reader positioned at the packet body.
#[inline]
pub(crate) fn body_reader(data: &[u8]) -> Reader {
    let mut reader = Cursor::new(data);
    reader.set_position(HEAD_BYTES as u64);
    reader
}

#[inline]
pub(crate) fn read_u8(reader: &mut Reader) -> LinkResult<u8> {
    reader.read_u8().map_err(|_| LinkError::InvalidMessage)
}

#[inline]
pub(crate) fn read_u16(reader: &mut Reader) -> LinkResult<u16> {
    reader
        .read_u16::<BigEndian>()
        .map_err(|_| LinkError::InvalidMessage)
}

#[inline]
pub(crate) fn read_u32(reader: &mut Reader) -> LinkResult<u32> {
    reader
        .read_u32::<BigEndian>()
        .map_err(|_| LinkError::InvalidMessage)
}

#[inline]
pub(crate) fn read_i32(reader: &mut Reader) -> LinkResult<i32> {
    reader
        .read_i32::<BigEndian>()
        .map_err(|_| LinkError::InvalidMessage)
}

#[inline]
pub(crate) fn read_i64(reader: &mut Reader) -> LinkResult<i64> {
    reader
        .read_i64::<BigEndian>()
        .map_err(|_| LinkError::InvalidMessage)
}

#[inline]
pub(crate) fn read_u64(reader: &mut Reader) -> LinkResult<u64> {
    reader
        .read_u64::<BigEndian>()
        .map_err(|_| LinkError::InvalidMessage)
}
