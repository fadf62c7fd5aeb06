//! Multipart frames and their stream encoding.
//!
//! Stream layout: `u32 BE part count`, then for each part `u32 BE length`
//! followed by the part bytes.

use std::io::{self, Read, Write};

use bytes::{BufMut, Bytes, BytesMut};

/// Largest encoded frame accepted from the wire (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
/// Largest number of parts accepted from the wire.
pub const MAX_FRAME_PARTS: usize = 64;

/// Number of parts in a message frame: type label and serialized envelope.
pub const MESSAGE_PARTS: usize = 2;

/// Errors raised when a frame does not have the message shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Malformed frame: expected {expected} parts, got {actual}")]
    InvalidPartCount { expected: usize, actual: usize },

    #[error("Malformed frame: type label is not valid UTF-8")]
    InvalidTypeLabel,
}

/// One multipart unit as sent through a socket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    parts: Vec<Bytes>,
}

impl Frame {
    pub fn new(parts: Vec<Bytes>) -> Self {
        Self { parts }
    }

    /// Build a two-part message frame.
    pub fn message(message_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            parts: vec![
                Bytes::copy_from_slice(message_type.as_bytes()),
                body.into(),
            ],
        }
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<Bytes> {
        self.parts
    }

    /// Total payload size in bytes.
    pub fn byte_len(&self) -> usize {
        self.parts.iter().map(Bytes::len).sum()
    }

    fn ensure_message(&self) -> Result<(), FrameError> {
        if self.parts.len() != MESSAGE_PARTS {
            return Err(FrameError::InvalidPartCount {
                expected: MESSAGE_PARTS,
                actual: self.parts.len(),
            });
        }
        Ok(())
    }

    /// Type label of a message frame.
    pub fn message_type(&self) -> Result<&str, FrameError> {
        self.ensure_message()?;
        std::str::from_utf8(&self.parts[0]).map_err(|_| FrameError::InvalidTypeLabel)
    }

    /// Serialized envelope of a message frame.
    pub fn serialized_message(&self) -> Result<&Bytes, FrameError> {
        self.ensure_message()?;
        Ok(&self.parts[1])
    }
}

fn encoded_len(frame: &Frame) -> usize {
    4 + frame.parts.iter().map(|p| 4 + p.len()).sum::<usize>()
}

/// Encode a frame into a single buffer.
pub fn encode_frame(frame: &Frame) -> io::Result<Bytes> {
    let len = encoded_len(frame);
    if len > MAX_FRAME_SIZE || frame.parts.len() > MAX_FRAME_PARTS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "frame too large: {} bytes in {} parts",
                len,
                frame.parts.len()
            ),
        ));
    }
    let mut buf = BytesMut::with_capacity(len);
    buf.put_u32(frame.parts.len() as u32);
    for part in &frame.parts {
        buf.put_u32(part.len() as u32);
        buf.put_slice(part);
    }
    Ok(buf.freeze())
}

/// Decode a frame from a complete buffer (one datagram).
pub fn decode_frame(mut bytes: &[u8]) -> io::Result<Frame> {
    let frame = read_frame(&mut bytes)?;
    if !bytes.is_empty() {
        return Err(invalid_data("trailing bytes after frame"));
    }
    Ok(frame)
}

/// Write one frame to a stream.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    let encoded = encode_frame(frame)?;
    writer.write_all(&encoded)?;
    writer.flush()
}

/// Read one frame from a stream.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    let count = read_u32(reader)? as usize;
    if count > MAX_FRAME_PARTS {
        return Err(invalid_data(format!("too many frame parts: {}", count)));
    }
    let mut total = 4;
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_u32(reader)? as usize;
        total += 4 + len;
        if total > MAX_FRAME_SIZE {
            return Err(invalid_data(format!("frame exceeds {} bytes", MAX_FRAME_SIZE)));
        }
        let mut part = vec![0u8; len];
        reader.read_exact(&mut part)?;
        parts.push(Bytes::from(part));
    }
    Ok(Frame { parts })
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_frame_accessors() {
        let frame = Frame::message("OrderPlaced", &b"{}"[..]);
        assert_eq!(frame.part_count(), 2);
        assert_eq!(frame.message_type().unwrap(), "OrderPlaced");
        assert_eq!(frame.serialized_message().unwrap().as_ref(), b"{}");
    }

    #[test]
    fn test_wrong_part_count_rejected() {
        let one = Frame::new(vec![Bytes::from_static(b"only")]);
        let three = Frame::new(vec![Bytes::new(), Bytes::new(), Bytes::new()]);

        assert_eq!(
            one.message_type(),
            Err(FrameError::InvalidPartCount {
                expected: 2,
                actual: 1
            })
        );
        assert!(three.serialized_message().is_err());
    }

    #[test]
    fn test_non_utf8_label_rejected() {
        let frame = Frame::new(vec![Bytes::from_static(&[0xff, 0xfe]), Bytes::new()]);
        assert_eq!(frame.message_type(), Err(FrameError::InvalidTypeLabel));
    }

    #[test]
    fn test_stream_encoding_layout() {
        let frame = Frame::message("A", &b"xy"[..]);
        let encoded = encode_frame(&frame).unwrap();
        assert_eq!(
            encoded.as_ref(),
            &[0, 0, 0, 2, 0, 0, 0, 1, b'A', 0, 0, 0, 2, b'x', b'y']
        );
        assert_eq!(decode_frame(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_read_frames_back_to_back() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::message("first", &b"1"[..])).unwrap();
        write_frame(&mut buf, &Frame::message("second", &b"2"[..])).unwrap();

        let mut reader = buf.as_slice();
        assert_eq!(read_frame(&mut reader).unwrap().message_type().unwrap(), "first");
        assert_eq!(read_frame(&mut reader).unwrap().message_type().unwrap(), "second");
        assert_eq!(
            read_frame(&mut reader).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn test_oversized_length_rejected() {
        let bytes = [0, 0, 0, 1, 0xff, 0xff, 0xff, 0xff];
        let err = decode_frame(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut encoded = encode_frame(&Frame::message("A", &b""[..])).unwrap().to_vec();
        encoded.push(0);
        assert!(decode_frame(&encoded).is_err());
    }
}
