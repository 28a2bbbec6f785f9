mod codec;
mod message;

pub use codec::FrameCodec;
pub use message::{
    AckMode, AckRequest, CancelRequest, DeclareQueueRequest, DeliverFrame, ErrorCode, ErrorResponse, Frame,
    FrameType, NackRequest, OkResponse, PublishRequest, SubscribeRequest,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame type: {0}")]
    InvalidFrameType(u8),

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum frame size: 11MB
pub const MAX_FRAME_SIZE: usize = 11 * 1024 * 1024;

/// Default TCP port of the broker daemon
pub const DEFAULT_BROKER_PORT: u16 = 5673;
