use serde::{Deserialize, Serialize};

/// Frame types for the broker protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    DeclareQueue = 1,
    Publish = 2,
    Subscribe = 3,
    Deliver = 4,
    Ack = 5,
    Nack = 6,
    Ok = 7,
    Error = 8,
    Cancel = 9,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(FrameType::DeclareQueue),
            2 => Some(FrameType::Publish),
            3 => Some(FrameType::Subscribe),
            4 => Some(FrameType::Deliver),
            5 => Some(FrameType::Ack),
            6 => Some(FrameType::Nack),
            7 => Some(FrameType::Ok),
            8 => Some(FrameType::Error),
            9 => Some(FrameType::Cancel),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// How a consumer acknowledges deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AckMode {
    /// Consumed the instant it is delivered
    #[default]
    Auto,
    /// Held by the broker until the consumer acks or nacks it
    Manual,
}

/// Protocol frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Ensure a queue exists (idempotent)
    DeclareQueue(DeclareQueueRequest),

    /// Enqueue a message; the broker sends no reply
    Publish(PublishRequest),

    /// Register a consumer on a queue
    Subscribe(SubscribeRequest),

    /// Broker pushes a message to a consumer
    Deliver(DeliverFrame),

    /// Consumer finished with a manual-ack delivery
    Ack(AckRequest),

    /// Consumer rejects a manual-ack delivery
    Nack(NackRequest),

    /// Request succeeded
    Ok(OkResponse),

    /// Request failed
    Error(ErrorResponse),

    /// Consumer no longer wants deliveries; the broker sends no reply
    Cancel(CancelRequest),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::DeclareQueue(_) => FrameType::DeclareQueue,
            Frame::Publish(_) => FrameType::Publish,
            Frame::Subscribe(_) => FrameType::Subscribe,
            Frame::Deliver(_) => FrameType::Deliver,
            Frame::Ack(_) => FrameType::Ack,
            Frame::Nack(_) => FrameType::Nack,
            Frame::Ok(_) => FrameType::Ok,
            Frame::Error(_) => FrameType::Error,
            Frame::Cancel(_) => FrameType::Cancel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclareQueueRequest {
    pub request_id: u64,
    pub queue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub queue: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub request_id: u64,
    pub queue: String,
    /// Chosen by the client, unique per connection
    pub consumer_tag: u64,
    pub ack_mode: AckMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverFrame {
    pub consumer_tag: u64,
    /// Unique per connection; used to ack or nack
    pub delivery_tag: u64,
    pub queue: String,
    pub body: Vec<u8>,
    /// 1 on first delivery, incremented on every requeue
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckRequest {
    pub delivery_tag: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NackRequest {
    pub delivery_tag: u64,
    pub requeue: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub consumer_tag: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OkResponse {
    pub request_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    QueueNotFound,
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Absent when the failing frame carried no request id
    pub request_id: Option<u64>,
    pub code: ErrorCode,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::from_u8(1), Some(FrameType::DeclareQueue));
        assert_eq!(FrameType::from_u8(8), Some(FrameType::Error));
        assert_eq!(FrameType::from_u8(9), Some(FrameType::Cancel));
        assert_eq!(FrameType::from_u8(0), None);
        assert_eq!(FrameType::from_u8(99), None);

        assert_eq!(FrameType::Publish.as_u8(), 2);
        assert_eq!(FrameType::Deliver.as_u8(), 4);
    }

    #[test]
    fn test_frame_type_matches_variant() {
        let frame = Frame::Nack(NackRequest {
            delivery_tag: 3,
            requeue: true,
        });
        assert_eq!(frame.frame_type(), FrameType::Nack);
    }
}
