use crate::{Frame, FrameType, ProtocolError, Result, MAX_FRAME_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for broker frames with length-prefixed framing
///
/// Frame format: [4-byte length (big-endian)] [1-byte frame type] [payload]
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least 5 bytes for length prefix + frame type
        if src.len() < 5 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        // Wait for complete frame
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);

        let type_byte = src.get_u8();
        let frame_type =
            FrameType::from_u8(type_byte).ok_or(ProtocolError::InvalidFrameType(type_byte))?;

        let payload = src.split_to(length - 1);

        let frame = match frame_type {
            FrameType::DeclareQueue => Frame::DeclareQueue(bincode::deserialize(&payload)?),
            FrameType::Publish => Frame::Publish(bincode::deserialize(&payload)?),
            FrameType::Subscribe => Frame::Subscribe(bincode::deserialize(&payload)?),
            FrameType::Deliver => Frame::Deliver(bincode::deserialize(&payload)?),
            FrameType::Ack => Frame::Ack(bincode::deserialize(&payload)?),
            FrameType::Nack => Frame::Nack(bincode::deserialize(&payload)?),
            FrameType::Ok => Frame::Ok(bincode::deserialize(&payload)?),
            FrameType::Error => Frame::Error(bincode::deserialize(&payload)?),
            FrameType::Cancel => Frame::Cancel(bincode::deserialize(&payload)?),
        };

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let payload = match &item {
            Frame::DeclareQueue(req) => bincode::serialize(req)?,
            Frame::Publish(req) => bincode::serialize(req)?,
            Frame::Subscribe(req) => bincode::serialize(req)?,
            Frame::Deliver(frame) => bincode::serialize(frame)?,
            Frame::Ack(req) => bincode::serialize(req)?,
            Frame::Nack(req) => bincode::serialize(req)?,
            Frame::Ok(resp) => bincode::serialize(resp)?,
            Frame::Error(resp) => bincode::serialize(resp)?,
            Frame::Cancel(req) => bincode::serialize(req)?,
        };

        let total_length = 1 + payload.len();
        if total_length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(total_length));
        }

        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.frame_type().as_u8());
        dst.put_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AckMode, DeliverFrame, PublishRequest, SubscribeRequest};

    #[test]
    fn test_decodes_back_to_back_frames() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();

        let subscribe = Frame::Subscribe(SubscribeRequest {
            request_id: 7,
            queue: "frontendMessage".to_string(),
            consumer_tag: 1,
            ack_mode: AckMode::Manual,
        });
        let deliver = Frame::Deliver(DeliverFrame {
            consumer_tag: 1,
            delivery_tag: 42,
            queue: "frontendMessage".to_string(),
            body: br#"{"type":"loginResponse"}"#.to_vec(),
            attempt: 2,
        });

        codec.encode(subscribe.clone(), &mut buffer).unwrap();
        codec.encode(deliver.clone(), &mut buffer).unwrap();

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(subscribe));
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(deliver));
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();

        let frame = Frame::Publish(PublishRequest {
            queue: "userLogin".to_string(),
            body: b"{\"name\":\"alice\"}".to_vec(),
        });
        codec.encode(frame.clone(), &mut buffer).unwrap();

        let full_len = buffer.len();
        let rest = buffer.split_off(full_len / 2);

        // Should return None (waiting for more data)
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(&rest);
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(frame));
    }

    #[test]
    fn test_rejects_oversized_length_prefix() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buffer.put_u8(FrameType::Publish.as_u8());

        let result = codec.decode(&mut buffer);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge(_))));
    }

    #[test]
    fn test_rejects_unknown_frame_type() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32(1);
        buffer.put_u8(200);

        let result = codec.decode(&mut buffer);
        assert!(matches!(result, Err(ProtocolError::InvalidFrameType(200))));
    }

    #[test]
    fn test_rejects_empty_frame() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32(0);
        buffer.put_u8(0);

        assert!(matches!(codec.decode(&mut buffer), Err(ProtocolError::EmptyFrame)));
    }
}
