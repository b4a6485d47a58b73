use bytes::{Buf, BufMut, BytesMut};
use std::io::{self, Cursor};
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{self, Frame};

/// Size of the big-endian length field in front of every message.
const LENGTH_FIELD_LEN: usize = 4;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, ThisError)]
pub enum CodecError {
    /// The bytes on the wire do not form a valid message. The connection can't be trusted anymore.
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("frame of {size} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Splits a byte stream into messages: a 4-byte big-endian length followed by exactly one
/// [`Frame`] of that many bytes.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> FrameCodec {
        FrameCodec { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encodes a single frame into a standalone message.
    pub fn encode_message(frame: &Frame) -> BytesMut {
        let mut dst = BytesMut::new();
        write_message(frame, &mut dst);
        dst
    }

    /// Decodes a buffer that must hold exactly one complete message.
    pub fn decode_message(&mut self, bytes: &[u8]) -> Result<Frame, CodecError> {
        let mut src = BytesMut::from(bytes);
        match self.decode(&mut src)? {
            Some(frame) if src.is_empty() => Ok(frame),
            Some(_) => Err(CodecError::Malformed(
                "trailing bytes after message".to_string(),
            )),
            None => Err(CodecError::Malformed("truncated message".to_string())),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_LEN {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_FIELD_LEN];
        length_bytes.copy_from_slice(&src[..LENGTH_FIELD_LEN]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        // Check the announced size before buffering anything to prevent DoS attacks.
        if length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        if src.len() < LENGTH_FIELD_LEN + length {
            src.reserve(LENGTH_FIELD_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_LEN);
        let payload = src.split_to(length);

        // The whole payload is available, so anything short of a complete frame is corruption.
        let mut cursor = Cursor::new(&payload[..]);
        let frame = match Frame::parse(&mut cursor) {
            Ok(frame) => frame,
            Err(frame::Error::Incomplete) => {
                return Err(CodecError::Malformed(
                    "payload shorter than its frame".to_string(),
                ))
            }
            Err(err) => return Err(CodecError::Malformed(err.to_string())),
        };

        if cursor.position() as usize != payload.len() {
            return Err(CodecError::Malformed(
                "payload longer than its frame".to_string(),
            ));
        }

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&Frame>>::encode(self, &frame, dst)
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        write_message(frame, dst);

        let size = dst.len() - start - LENGTH_FIELD_LEN;
        if size > self.max_frame_size {
            dst.truncate(start);
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        Ok(())
    }
}

fn write_message(frame: &Frame, dst: &mut BytesMut) {
    let start = dst.len();
    dst.put_u32(0);
    frame.write_to(dst);

    let length = (dst.len() - start - LENGTH_FIELD_LEN) as u32;
    dst[start..start + LENGTH_FIELD_LEN].copy_from_slice(&length.to_be_bytes());
}
