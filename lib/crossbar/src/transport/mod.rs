//! The framed transport between cluster instances: a pooled, sequenced
//! request/response client, the matching acceptor server, and the typed
//! per-peer-kind façades over both.

pub mod builder;
pub mod client;
pub mod gate;
pub mod node;
pub mod protocol;
pub mod server;

use std::io::{self, Read};

use byteorder::{BigEndian, ByteOrder};

use protocol::{DATA_BIT, HEAD_BYTES, MAX_FRAME_SIZE, SIZE_BYTES};

pub use builder::{Builder, BuilderOptions};
pub use client::{Client, ClientOptions, CloseHandler};
pub use gate::{GateClient, GateHandler, GateProvider};
pub use node::{NodeClient, NodeHandler, NodeProvider};
pub use server::Server;

/// Builder producing gate-facing clients.
pub type GateBuilder = Builder<GateClient>;

/// Builder producing node-facing clients.
pub type NodeBuilder = Builder<NodeClient>;

/// Outcome of dispatching one request frame to a provider.
pub enum Dispatch {
    /// A response frame to write back to the peer.
    Reply(Vec<u8>),
    /// Handled; no response is produced.
    Silent,
    /// The route byte is not part of this handler's protocol.
    Unknown,
}

/// Server-side request dispatcher: decodes one request frame and produces an
/// optional response frame.
pub trait Handler: Send + Sync {
    fn handle(&self, frame: &[u8], route: u8, seq: u64) -> Dispatch;
}

/// A frame lifted off the wire.
#[derive(Debug)]
pub(crate) enum Frame {
    Heartbeat,
    /// The complete packet, size prefix included.
    Data(Vec<u8>),
}

/// Reads a single frame. Frames beyond `MAX_FRAME_SIZE` and data frames too
/// short to carry a packet head surface as `InvalidData`, which callers treat
/// as fatal for the connection.
pub(crate) fn read_frame<R: Read>(stream: &mut R) -> io::Result<Frame> {
    let mut head = [0u8; SIZE_BYTES];
    stream.read_exact(&mut head)?;

    let size = BigEndian::read_u32(&head) as usize;

    if size == 0 || size + SIZE_BYTES > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Frame size out of bounds",
        ));
    }

    let mut frame = vec![0u8; SIZE_BYTES + size];
    frame[..SIZE_BYTES].copy_from_slice(&head);
    stream.read_exact(&mut frame[SIZE_BYTES..])?;

    if frame[SIZE_BYTES] & DATA_BIT == 0 {
        return Ok(Frame::Heartbeat);
    }

    if frame.len() < HEAD_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Data frame too short",
        ));
    }

    Ok(Frame::Data(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::Code;
    use std::io::Cursor;

    #[test]
    fn test_read_frame_data() {
        let packet = protocol::bind::encode_bind_req(1, 7, 42);
        let mut cursor = Cursor::new(packet.clone());

        match read_frame(&mut cursor).unwrap() {
            Frame::Data(frame) => assert_eq!(frame, packet),
            Frame::Heartbeat => panic!("Expected a data frame"),
        }
    }

    #[test]
    fn test_read_frame_heartbeat() {
        let mut cursor = Cursor::new(protocol::heartbeat_packet());

        assert!(matches!(read_frame(&mut cursor).unwrap(), Frame::Heartbeat));
    }

    #[test]
    fn test_read_frame_consecutive() {
        let mut data = protocol::heartbeat_packet();
        data.extend(protocol::bind::encode_bind_res(1, Code::Ok));
        let mut cursor = Cursor::new(data);

        assert!(matches!(read_frame(&mut cursor).unwrap(), Frame::Heartbeat));
        assert!(matches!(read_frame(&mut cursor).unwrap(), Frame::Data(_)));
    }

    #[test]
    fn test_read_frame_rejects_oversize() {
        let mut data = vec![0u8; 8];
        BigEndian::write_u32(&mut data[..4], MAX_FRAME_SIZE as u32);
        let mut cursor = Cursor::new(data);

        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_frame_rejects_short_data_frame() {
        // A data frame whose declared size cannot carry route + seq.
        let mut data = vec![0u8; 4 + 2];
        BigEndian::write_u32(&mut data[..4], 2);
        data[4] = DATA_BIT;
        let mut cursor = Cursor::new(data);

        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_frame_truncated_body() {
        let packet = protocol::bind::encode_bind_req(1, 7, 42);
        let mut cursor = Cursor::new(packet[..packet.len() - 3].to_vec());

        assert!(read_frame(&mut cursor).is_err());
    }
}
