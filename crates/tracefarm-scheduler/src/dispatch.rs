use crate::actor::{ActorContext, SceneActor, SceneCommand, SceneHandle};
use crate::config::SchedulingConfig;
use crate::connection::Connection;
use crate::finalizer::Finalizer;
use crate::ledger::SceneLedger;
use crate::metrics::SchedulerMetrics;
use crate::scene::SceneProgress;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracefarm_core::{SceneId, SceneSpec, SchedulingError, WorkerId};
use tracing::{debug, info, warn};

/// Routes worker events to the actor of the scene they name.
///
/// The active-scene map is the only state shared across scenes. Entries are
/// inserted by [`Dispatcher::start_scene`] and removed by the actor itself
/// once its scene is finished.
pub struct Dispatcher {
    scenes: Arc<DashMap<SceneId, SceneHandle>>,
    config: SchedulingConfig,
    ctx: ActorContext,
}

impl Dispatcher {
    pub fn new(
        config: SchedulingConfig,
        ledger: Arc<dyn SceneLedger>,
        finalizer: Arc<dyn Finalizer>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        let scenes = Arc::new(DashMap::new());
        let ctx = ActorContext {
            ledger,
            finalizer,
            metrics,
            scenes: scenes.clone(),
        };
        Dispatcher { scenes, config, ctx }
    }

    /// Partition a scene and start its actor
    pub fn start_scene(&self, spec: SceneSpec) -> Result<(), SchedulingError> {
        match self.scenes.entry(spec.id) {
            Entry::Occupied(_) => Err(SchedulingError::SceneAlreadyActive(spec.id.to_string())),
            Entry::Vacant(entry) => {
                let (actor, handle) = SceneActor::new(spec, self.config, self.ctx.clone())?;
                entry.insert(handle);
                self.ctx.metrics.scenes_active.inc();
                tokio::spawn(actor.run());
                Ok(())
            }
        }
    }

    /// Start every scene the ledger knows to be unfinished
    pub fn recover(&self) -> anyhow::Result<usize> {
        self.ctx.ledger.reset_workers()?;
        let specs = self.ctx.ledger.unfinished_scenes()?;
        let mut started = 0;

        for spec in specs {
            match self.start_scene(spec) {
                Ok(()) => started += 1,
                Err(e) => warn!(scene_id = %spec.id, "Failed to recover scene: {}", e),
            }
        }

        info!("Recovered {} unfinished scenes", started);
        Ok(started)
    }

    /// Deliver a command to a scene. Events for unknown scenes are dropped.
    pub fn route(&self, scene_id: SceneId, command: SceneCommand) -> bool {
        let Some(handle) = self.handle(&scene_id) else {
            debug!(scene_id = %scene_id, "Dropping event for unknown scene");
            return false;
        };
        if !handle.send(command) {
            debug!(scene_id = %scene_id, "Scene stopped before event was delivered");
            return false;
        }
        true
    }

    /// Join a worker to a scene, returning its allocated id
    pub async fn join(
        &self,
        scene_id: SceneId,
        owner_id: String,
        connection: Connection,
    ) -> Option<WorkerId> {
        let (reply, rx) = oneshot::channel();
        let command = SceneCommand::Join {
            owner_id,
            connection,
            reply,
        };
        if !self.route(scene_id, command) {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn progress(&self, scene_id: SceneId) -> Option<SceneProgress> {
        let (reply, rx) = oneshot::channel();
        if !self.route(scene_id, SceneCommand::Snapshot { reply }) {
            return None;
        }
        rx.await.ok()
    }

    /// Progress of every active scene
    pub async fn all_progress(&self) -> Vec<SceneProgress> {
        let mut progress = Vec::new();
        for scene_id in self.active_scenes() {
            if let Some(p) = self.progress(scene_id).await {
                progress.push(p);
            }
        }
        progress
    }

    pub fn is_active(&self, scene_id: &SceneId) -> bool {
        self.scenes.contains_key(scene_id)
    }

    pub fn active_count(&self) -> usize {
        self.scenes.len()
    }

    pub fn active_scenes(&self) -> Vec<SceneId> {
        self.scenes.iter().map(|entry| *entry.key()).collect()
    }

    pub fn config(&self) -> SchedulingConfig {
        self.config
    }

    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.ctx.metrics.clone()
    }

    /// Ask every scene actor to stop and wait for them to exit.
    ///
    /// Returns false if some actors were still running at the deadline. A
    /// scene in the middle of finalizing gets to write its image first.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let handles: Vec<SceneHandle> = self.scenes.iter().map(|e| e.value().clone()).collect();
        info!("Stopping {} scenes", handles.len());
        for handle in handles {
            handle.send(SceneCommand::Shutdown);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let active = self.active_count();
            if active == 0 {
                info!("All scenes stopped");
                return true;
            }
            if Instant::now() >= deadline {
                warn!("Shutdown deadline exceeded, {} scenes still active", active);
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    // clone out so no shard lock is held while sending
    fn handle(&self, scene_id: &SceneId) -> Option<SceneHandle> {
        self.scenes.get(scene_id).map(|h| h.value().clone())
    }
}
