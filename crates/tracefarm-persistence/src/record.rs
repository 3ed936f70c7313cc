use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracefarm_core::{SceneId, SceneSpec};
use uuid::Uuid;

/// Persisted metadata for a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub id: SceneId,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set the first time a worker joins
    pub started_rendering: bool,

    pub finished_rendering: bool,

    /// Workers currently joined, as reported by the scheduler
    pub workers_connected: u32,

    /// Location of the finished image
    pub artifact_path: Option<String>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl SceneRecord {
    /// Create a record for a new, unstarted scene
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let spec = SceneSpec::new(Uuid::new_v4(), width, height)?;
        let now = Utc::now();
        Ok(SceneRecord {
            id: spec.id,
            width,
            height,
            created_at: now,
            updated_at: now,
            started_rendering: false,
            finished_rendering: false,
            workers_connected: 0,
            artifact_path: None,
            finished_at: None,
        })
    }

    pub fn spec(&self) -> Result<SceneSpec> {
        Ok(SceneSpec::new(self.id, self.width, self.height)?)
    }

    pub fn worker_joined(&mut self) {
        self.started_rendering = true;
        self.workers_connected += 1;
        self.updated_at = Utc::now();
    }

    pub fn worker_left(&mut self) {
        self.workers_connected = self.workers_connected.saturating_sub(1);
        self.updated_at = Utc::now();
    }

    /// Nobody is connected after a scheduler restart
    pub fn reset_workers(&mut self) {
        self.workers_connected = 0;
        self.updated_at = Utc::now();
    }

    pub fn finish(&mut self, artifact_path: Option<String>) {
        let now = Utc::now();
        self.finished_rendering = true;
        self.artifact_path = artifact_path;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
