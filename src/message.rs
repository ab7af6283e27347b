//! Message framing: message ids, the request/response header shape, and the
//! length-prefixed frame both transport bindings share (`spec.md` §4.3).

use std::io::{Read, Write};

use crate::codec::{Reader, Writer};
use crate::Error;

/// The default cap on a single frame's payload length. Both bindings use
/// this as their receive buffer size (`spec.md` §6).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 65536;

/// The 4 bytes every message - request, response or push - begins with.
pub const MESSAGE_ID_LEN: usize = 4;

/// The message id that opens every request, response and push message.
///
/// Request ids are even and response ids are odd within a method pair;
/// push channels consume a single (request-shaped) id. See
/// [`crate::dispatch::MessageIdAllocator`] for how a generated service
/// assigns these from its per-service base.
pub fn peek_message_id(payload: &[u8]) -> Result<u32, Error> {
    let mut r = Reader::new(payload);
    r.read_u32()
}

/// The header written before an RPC response payload: the message id the
/// request carried (with its even/odd partner bit set, see
/// [`crate::dispatch::MessageIdAllocator::response_id`]), followed by a
/// status field the core treats as opaque (`spec.md` §4.3, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// The response message id (the request's id with its low bit set).
    pub message_id: u32,
    /// Reserved for handler use; the runtime never interprets this value.
    pub status: i32,
}

impl ResponseHeader {
    /// The status value generated server code writes on a successful
    /// dispatch.
    pub const STATUS_OK: i32 = 0;

    /// Write the header's bytes: message id, then status.
    pub fn encode_into(&self, w: &mut Writer) {
        w.write_u32(self.message_id);
        w.write_i32(self.status);
    }

    /// Read a response header from the front of a response message.
    pub fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            message_id: r.read_u32()?,
            status: r.read_i32()?,
        })
    }
}

/// The header written before an RPC request or push payload: just the
/// message id naming the method/channel and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// The request (or push) message id.
    pub message_id: u32,
}

impl RequestHeader {
    /// Write the header's bytes: the message id alone.
    pub fn encode_into(&self, w: &mut Writer) {
        w.write_u32(self.message_id);
    }

    /// Read a request header from the front of a request/push message.
    pub fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            message_id: r.read_u32()?,
        })
    }
}

/// Write a frame - a `u32` big-endian byte length, then `payload` - to `w`.
///
/// Used by both bindings: the stream binding trusts the transport to
/// deliver the declared number of bytes next; the datagram binding relies
/// on the frame fitting in a single datagram and duplicates the length so
/// the receiver can cross-check it against the physical datagram size.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), Error> {
    let len = payload.len() as u32;
    let mut header = Writer::with_capacity(4);
    header.write_u32(len);
    w.write_all(header.as_slice())?;
    w.write_all(payload)?;
    Ok(())
}

/// Serialise a frame to a new, exactly-sized `Vec<u8>`.
pub fn frame_to_vec(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MESSAGE_ID_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Read one frame from a stream-oriented transport: a `u32` length prefix,
/// then exactly that many bytes. Rejects frames declaring more than
/// `max_len` bytes without reading the oversized payload.
pub fn read_frame<R: Read>(r: &mut R, max_len: u32) -> Result<Vec<u8>, Error> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);

    if len > max_len {
        return Err(Error::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

/// Validate and strip the length prefix from a single received datagram.
///
/// The datagram binding duplicates the length in the header for
/// cross-validation against the physical size of the packet actually
/// received (`spec.md` §4.3) - any mismatch indicates truncation or a
/// corrupt sender and is rejected rather than silently accepted.
pub fn validate_datagram_frame(datagram: &[u8], max_len: u32) -> Result<&[u8], Error> {
    if datagram.len() < MESSAGE_ID_LEN {
        return Err(Error::UnexpectedEof {
            wanted: MESSAGE_ID_LEN,
            remaining: datagram.len(),
        });
    }

    let len = u32::from_be_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
    let payload = &datagram[MESSAGE_ID_LEN..];

    if len != payload.len() as u32 {
        return Err(Error::FrameLengthMismatch {
            prefix: len,
            actual: payload.len() as u32,
        });
    }

    if len > max_len {
        return Err(Error::FrameTooLarge { len, max: max_len });
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let payload = b"hello world";
        let mut buf = Vec::new();
        write_frame(&mut buf, payload).unwrap();

        assert_eq!(buf.len(), MESSAGE_ID_LEN + payload.len());

        let mut c = Cursor::new(buf.as_slice());
        let got = read_frame(&mut c, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn test_frame_to_vec_matches_write_frame() {
        let payload = b"abc";
        let mut buf = Vec::new();
        write_frame(&mut buf, payload).unwrap();
        assert_eq!(frame_to_vec(payload), buf);
    }

    #[test]
    fn test_frame_rejects_oversized_length_without_reading_payload() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        // Deliberately no payload bytes follow - if read_frame tried to read
        // them before checking the length it would hang/error differently.
        let mut c = Cursor::new(buf.as_slice());
        let err = read_frame(&mut c, 10).unwrap_err();
        assert!(matches!(
            err,
            Error::FrameTooLarge { len: 100, max: 10 }
        ));
    }

    #[test]
    fn test_datagram_validates_length_prefix() {
        let payload = b"ping";
        let datagram = frame_to_vec(payload);
        let got = validate_datagram_frame(&datagram, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn test_datagram_rejects_length_mismatch() {
        let mut datagram = frame_to_vec(b"ping");
        // Corrupt the length prefix so it disagrees with the actual datagram size.
        datagram[3] = 99;
        let err = validate_datagram_frame(&datagram, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, Error::FrameLengthMismatch { .. }));
    }

    #[test]
    fn test_message_id_is_first_four_bytes() {
        let mut w = Writer::new();
        RequestHeader { message_id: 1001 }.encode_into(&mut w);
        "payload".to_string().encode_into(&mut w);
        use crate::Encode;
        assert_eq!(peek_message_id(w.as_slice()).unwrap(), 1001);
    }

    #[test]
    fn test_response_header_round_trip() {
        let header = ResponseHeader {
            message_id: 1001,
            status: ResponseHeader::STATUS_OK,
        };
        let mut w = Writer::new();
        header.encode_into(&mut w);
        let mut r = Reader::new(w.as_slice());
        assert_eq!(ResponseHeader::decode_from(&mut r).unwrap(), header);
    }
}
