mod record;
mod store;

pub use record::SceneRecord;
pub use store::{SceneStore, SceneStoreConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),

    #[error("Scene error: {0}")]
    SceneError(#[from] tracefarm_core::SchedulingError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Scene not found: {0}")]
    SceneNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
