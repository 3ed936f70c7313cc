use tracefarm_core::{SceneId, SceneSpec};
use tracefarm_persistence::SceneStore;
use tracing::warn;

/// Persistent bookkeeping the scheduler reports scene activity to
pub trait SceneLedger: Send + Sync {
    /// Scenes that were created but never finished
    fn unfinished_scenes(&self) -> anyhow::Result<Vec<SceneSpec>>;

    /// Forget workers recorded by a previous run
    fn reset_workers(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn worker_joined(&self, scene_id: &SceneId) -> anyhow::Result<()>;

    fn worker_left(&self, scene_id: &SceneId) -> anyhow::Result<()>;

    /// Record that the scene's artifact has been produced
    fn scene_finished(&self, scene_id: &SceneId, artifact: Option<String>) -> anyhow::Result<()>;
}

impl SceneLedger for SceneStore {
    fn unfinished_scenes(&self) -> anyhow::Result<Vec<SceneSpec>> {
        let mut specs = Vec::new();
        for record in SceneStore::unfinished_scenes(self)? {
            match record.spec() {
                Ok(spec) => specs.push(spec),
                Err(e) => warn!("Skipping unusable scene record {}: {}", record.id, e),
            }
        }
        Ok(specs)
    }

    fn reset_workers(&self) -> anyhow::Result<()> {
        self.reset_worker_counts()?;
        Ok(())
    }

    fn worker_joined(&self, scene_id: &SceneId) -> anyhow::Result<()> {
        self.record_worker_joined(scene_id)?;
        Ok(())
    }

    fn worker_left(&self, scene_id: &SceneId) -> anyhow::Result<()> {
        self.record_worker_left(scene_id)?;
        Ok(())
    }

    fn scene_finished(&self, scene_id: &SceneId, artifact: Option<String>) -> anyhow::Result<()> {
        self.mark_finished(scene_id, artifact)?;
        Ok(())
    }
}
