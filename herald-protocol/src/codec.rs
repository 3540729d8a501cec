//! Message codec for frame delimiting
//!
//! Frames are a 4-byte big-endian length followed by a JSON body. Decoding
//! stops at the frame boundary and hands the body up as a [`RawFrame`];
//! parsing the body is the dispatcher's job, so a malformed body never tears
//! down the stream.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{Message, RawFrame};

/// Maximum frame body size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Expected a JSON object, got {0}")]
    UnexpectedShape(&'static str),
}

/// Codec used by both ends: encodes [`Message`]s, decodes [`RawFrame`]s
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_frame_size: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Codec with a smaller frame ceiling
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = RawFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least 4 bytes for length prefix
        if src.len() < 4 {
            return Ok(None);
        }

        // Peek at length without consuming
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let body = src.split_to(len).freeze();
        Ok(Some(RawFrame::Bytes(body)))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.to_json()?;

        if body.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode() {
        let mut codec = MessageCodec::new();
        let msg = Message::new("course:updated", json!({ "id": 7 }));

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.decode().unwrap(), msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = MessageCodec::new();

        let mut buf = BytesMut::new();
        codec
            .encode(Message::new("x", json!(null)), &mut buf)
            .unwrap();

        // Split buffer to simulate partial read
        let mut partial = buf.split_to(6);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::new("a", json!(1)), &mut buf).unwrap();
        codec.encode(Message::new("b", json!(2)), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap().decode().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap().decode().unwrap();
        assert_eq!(first.action, "a");
        assert_eq!(second.action, "b");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_malformed_body_still_framed() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_slice(b"{{{");

        // The codec delimits; parsing fails later without breaking the stream
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.body_len(), Some(3));
        assert!(frame.decode().is_err());
    }

    #[test]
    fn test_frame_too_large_on_decode() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_frame_too_large_on_encode() {
        let mut codec = MessageCodec::with_max_frame_size(16);
        let mut buf = BytesMut::new();
        let msg = Message::new("big", json!("0123456789abcdef"));

        let result = codec.encode(msg, &mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_framed_over_duplex() {
        use futures::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (a, b) = tokio::io::duplex(1024);
        let mut left = Framed::new(a, MessageCodec::new());
        let mut right = Framed::new(b, MessageCodec::new());

        left.send(Message::new("hello", json!({ "n": 1 })))
            .await
            .unwrap();

        let frame = right.next().await.unwrap().unwrap();
        assert_eq!(
            frame.decode().unwrap(),
            Message::new("hello", json!({ "n": 1 }))
        );
    }
}
