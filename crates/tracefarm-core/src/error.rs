use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("Invalid scene dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Chunk size must be between 1 and {}", crate::MAX_CHUNK_SIZE)]
    InvalidChunkSize,

    #[error("Scene already active: {0}")]
    SceneAlreadyActive(String),
}

pub type Result<T> = std::result::Result<T, SchedulingError>;
