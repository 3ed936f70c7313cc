use crate::{check_dimensions, Result, SchedulingError, MAX_CHUNK_SIZE};
use serde::{Deserialize, Serialize};

/// Sequence number of a unit of work, stable within a scene
pub type UnitId = u32;

/// Half-open range `[start, end)` over the row-major pixel index space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRange {
    pub start: u64,
    pub end: u64,
}

impl PixelRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, index: u64) -> bool {
        self.start <= index && index < self.end
    }
}

/// A contiguous slice of the image handed out as one indivisible piece of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: UnitId,
    pub range: PixelRange,
}

/// Split `[0, width * height)` into units of `chunk_size` pixels.
///
/// Units are numbered from zero in index order. Every unit holds exactly
/// `chunk_size` pixels except the last, which holds the remainder and is only
/// emitted when the remainder is non-zero.
pub fn partition(width: u32, height: u32, chunk_size: u32) -> Result<Vec<WorkUnit>> {
    check_dimensions(width, height)?;
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(SchedulingError::InvalidChunkSize);
    }

    let total = u64::from(width) * u64::from(height);
    let chunk = u64::from(chunk_size);
    // at most MAX_DIMENSION squared, so every id fits in a UnitId
    let count = total.div_ceil(chunk);

    let units = (0..count)
        .map(|n| {
            let start = n * chunk;
            WorkUnit {
                id: n as UnitId,
                range: PixelRange {
                    start,
                    end: (start + chunk).min(total),
                },
            }
        })
        .collect();

    Ok(units)
}
