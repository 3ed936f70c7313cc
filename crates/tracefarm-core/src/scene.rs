use crate::{Result, SchedulingError, MAX_DIMENSION};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a scene
pub type SceneId = Uuid;

/// Identity and dimensions of a scene to be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSpec {
    pub id: SceneId,
    pub width: u32,
    pub height: u32,
}

impl SceneSpec {
    /// Create a scene spec, rejecting empty or oversized images
    pub fn new(id: SceneId, width: u32, height: u32) -> Result<Self> {
        check_dimensions(width, height)?;
        Ok(SceneSpec { id, width, height })
    }

    pub fn total_pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Row-major pixel index for (x, y), if the coordinate lies inside the image
    pub fn pixel_index(&self, x: u32, y: u32) -> Option<u64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(u64::from(y) * u64::from(self.width) + u64::from(x))
    }

    /// Inverse of [`SceneSpec::pixel_index`]
    pub fn coordinates(&self, index: u64) -> Option<(u32, u32)> {
        if index >= self.total_pixels() {
            return None;
        }
        let width = u64::from(self.width);
        // both fit in u32 because index < width * height
        Some(((index % width) as u32, (index / width) as u32))
    }
}

/// Both sides must be in `1..=MAX_DIMENSION`
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    let valid = 1..=MAX_DIMENSION;
    if !valid.contains(&width) || !valid.contains(&height) {
        return Err(SchedulingError::InvalidDimensions { width, height });
    }
    Ok(())
}
