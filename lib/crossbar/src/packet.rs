//! The application-level message frame exchanged between client sessions and
//! business logic. This framing is distinct from the inter-instance wire
//! packet in `transport::protocol`; a deliver operation carries one of these
//! frames as its opaque payload.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::{LinkError, LinkResult};

const LEN_BYTES: usize = 4;
const ROUTE_BYTES: usize = 4;
const SEQ_BYTES: usize = 4;

/// Frame layout: `len:u32 | route:i32 | seq:i32 | buffer`, big-endian, `len`
/// excluding its own four bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    pub seq: i32,
    pub route: i32,
    pub buffer: Vec<u8>,
}

/// Packs a message into its framed byte representation.
pub fn pack_message(message: &Message) -> LinkResult<Vec<u8>> {
    let total = LEN_BYTES + ROUTE_BYTES + SEQ_BYTES + message.buffer.len();
    let mut buf = Vec::with_capacity(total);

    buf.write_u32::<BigEndian>((total - LEN_BYTES) as u32)
        .map_err(|_| LinkError::InvalidMessage)?;
    buf.write_i32::<BigEndian>(message.route)
        .map_err(|_| LinkError::InvalidMessage)?;
    buf.write_i32::<BigEndian>(message.seq)
        .map_err(|_| LinkError::InvalidMessage)?;
    buf.extend_from_slice(&message.buffer);

    Ok(buf)
}

/// Unpacks a framed byte representation, verifying the declared length
/// matches exactly.
pub fn unpack_message(data: &[u8]) -> LinkResult<Message> {
    if data.len() < LEN_BYTES + ROUTE_BYTES + SEQ_BYTES {
        return Err(LinkError::InvalidMessage);
    }

    let mut reader = Cursor::new(data);

    let len = reader
        .read_u32::<BigEndian>()
        .map_err(|_| LinkError::InvalidMessage)? as usize;

    if len != data.len() - LEN_BYTES {
        return Err(LinkError::InvalidMessage);
    }

    let route = reader
        .read_i32::<BigEndian>()
        .map_err(|_| LinkError::InvalidMessage)?;
    let seq = reader
        .read_i32::<BigEndian>()
        .map_err(|_| LinkError::InvalidMessage)?;

    Ok(Message {
        seq,
        route,
        buffer: data[LEN_BYTES + ROUTE_BYTES + SEQ_BYTES..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_roundtrip() {
        let message = Message {
            seq: 7,
            route: 301,
            buffer: vec![1, 2, 3, 4, 5],
        };

        let packed = pack_message(&message).unwrap();

        assert_eq!(packed.len(), 12 + 5);
        assert_eq!(unpack_message(&packed).unwrap(), message);
    }

    #[test]
    fn test_pack_empty_buffer() {
        let message = Message {
            seq: 0,
            route: 1,
            buffer: Vec::new(),
        };

        let packed = pack_message(&message).unwrap();

        assert_eq!(packed.len(), 12);
        assert_eq!(unpack_message(&packed).unwrap(), message);
    }

    #[test]
    fn test_unpack_rejects_truncated() {
        let message = Message {
            seq: 1,
            route: 2,
            buffer: vec![9; 16],
        };

        let packed = pack_message(&message).unwrap();

        assert_eq!(
            unpack_message(&packed[..packed.len() - 1]).unwrap_err(),
            LinkError::InvalidMessage
        );
        assert_eq!(unpack_message(&[1, 2]).unwrap_err(), LinkError::InvalidMessage);
    }
}
