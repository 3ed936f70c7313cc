mod error;
mod pixel;
mod scene;
mod unit;
mod worker;

pub use error::{SchedulingError, Result};
pub use pixel::Pixel;
pub use scene::{check_dimensions, SceneId, SceneSpec};
pub use unit::{partition, PixelRange, UnitId, WorkUnit};
pub use worker::{OwnerId, WorkerId};

/// Default number of pixels in one unit of work
pub const DEFAULT_CHUNK_SIZE: u32 = 2500;

/// Default time a worker has to return a unit before it is handed out again
pub const DEFAULT_TOLERANCE_SECS: u64 = 30;

/// Largest unit a worker can return in one protocol frame.
///
/// A pixel serializes to under 90 bytes of JSON even with ten-digit
/// coordinates and exponent-form channels, so a full unit stays well inside
/// the 4 MiB frame limit.
pub const MAX_CHUNK_SIZE: u32 = 32_768;

/// Largest accepted width or height. The finished RGBA image is held in memory.
pub const MAX_DIMENSION: u32 = 8192;
