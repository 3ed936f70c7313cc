mod message;
mod codec;

pub use message::{ClientEvent, ServerEvent, UnitDescriptor, MAX_OWNER_ID_LEN};
pub use codec::{decode_text, encode_text, JsonFrameCodec, ServerCodec, WorkerCodec};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid message: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum encoded message size: room for a full unit of pixels with JSON overhead
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;
