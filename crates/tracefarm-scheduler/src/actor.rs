use crate::config::SchedulingConfig;
use crate::connection::Connection;
use crate::finalizer::{Finalizer, RenderedScene};
use crate::ledger::SceneLedger;
use crate::metrics::SchedulerMetrics;
use crate::scene::{Departure, SceneProgress, SceneScheduler};
use crate::timeout::{TimeoutDriver, TimeoutToken};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracefarm_core::{Pixel, SceneId, SceneSpec, SchedulingError, UnitId, WorkerId};
use tracing::{debug, error, info, warn};

/// Everything that can happen to a scene, applied one at a time by its actor
#[derive(Debug)]
pub enum SceneCommand {
    Join {
        owner_id: String,
        connection: Connection,
        reply: oneshot::Sender<Option<WorkerId>>,
    },
    Registered {
        worker_id: WorkerId,
    },
    RequestUnit {
        worker_id: WorkerId,
    },
    SubmitResult {
        worker_id: WorkerId,
        unit_id: UnitId,
        pixels: Vec<Pixel>,
    },
    Leave {
        worker_id: WorkerId,
    },
    Disconnect {
        worker_id: WorkerId,
    },
    AssignmentExpired {
        worker_id: WorkerId,
        unit_id: UnitId,
        token: TimeoutToken,
    },
    Snapshot {
        reply: oneshot::Sender<SceneProgress>,
    },
    Shutdown,
}

/// Sending side of a running scene actor
#[derive(Debug, Clone)]
pub struct SceneHandle {
    scene_id: SceneId,
    commands: mpsc::UnboundedSender<SceneCommand>,
}

impl SceneHandle {
    pub fn scene_id(&self) -> SceneId {
        self.scene_id
    }

    /// Returns false once the actor has stopped
    pub fn send(&self, command: SceneCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Collaborators shared by every scene actor
#[derive(Clone)]
pub struct ActorContext {
    pub ledger: Arc<dyn SceneLedger>,
    pub finalizer: Arc<dyn Finalizer>,
    pub metrics: Arc<SchedulerMetrics>,
    /// Active-scene map the actor removes itself from when it stops
    pub scenes: Arc<DashMap<SceneId, SceneHandle>>,
}

/// Owns one scene's scheduler and applies its commands in arrival order
pub struct SceneActor {
    scheduler: SceneScheduler,
    commands: mpsc::UnboundedReceiver<SceneCommand>,
    ctx: ActorContext,
}

impl SceneActor {
    pub fn new(
        spec: SceneSpec,
        config: SchedulingConfig,
        ctx: ActorContext,
    ) -> Result<(SceneActor, SceneHandle), SchedulingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let timers = TimeoutDriver::new(tx.clone(), config.tolerance());
        let scheduler = SceneScheduler::new(spec, config.chunk_size, timers, ctx.metrics.clone())?;

        let handle = SceneHandle {
            scene_id: spec.id,
            commands: tx,
        };
        let actor = SceneActor {
            scheduler,
            commands: rx,
            ctx,
        };
        Ok((actor, handle))
    }

    pub async fn run(mut self) {
        let scene_id = self.scheduler.spec().id;
        info!(
            scene_id = %scene_id,
            width = self.scheduler.spec().width,
            height = self.scheduler.spec().height,
            units = self.scheduler.units().len(),
            "Scene started"
        );

        while let Some(command) = self.commands.recv().await {
            if !self.handle(command) {
                break;
            }
            if let Some(rendered) = self.scheduler.take_rendered() {
                self.finish(rendered).await;
                break;
            }
        }

        self.scheduler.shutdown();
        self.ctx
            .metrics
            .workers_connected
            .sub(self.scheduler.workers().count() as i64);
        self.ctx.scenes.remove(&scene_id);
        self.ctx.metrics.scenes_active.dec();

        debug!(scene_id = %scene_id, "Scene actor stopped");
    }

    /// Apply one command. Returns false when the actor should stop.
    fn handle(&mut self, command: SceneCommand) -> bool {
        let scene_id = self.scheduler.spec().id;

        match command {
            SceneCommand::Join {
                owner_id,
                connection,
                reply,
            } => {
                let worker_id = self.scheduler.join(&owner_id, connection);
                if worker_id.is_some() {
                    if let Err(e) = self.ctx.ledger.worker_joined(&scene_id) {
                        warn!(scene_id = %scene_id, "Failed to record worker join: {}", e);
                    }
                }
                let _ = reply.send(worker_id);
            }
            SceneCommand::Registered { worker_id } => {
                self.scheduler.register(&worker_id);
            }
            SceneCommand::RequestUnit { worker_id } => {
                self.scheduler.request_unit(&worker_id);
            }
            SceneCommand::SubmitResult {
                worker_id,
                unit_id,
                pixels,
            } => {
                self.scheduler.submit_result(&worker_id, unit_id, pixels);
            }
            SceneCommand::Leave { worker_id } => self.depart(&worker_id, Departure::Leave),
            SceneCommand::Disconnect { worker_id } => self.depart(&worker_id, Departure::Disconnect),
            SceneCommand::AssignmentExpired {
                worker_id,
                unit_id,
                token,
            } => {
                self.scheduler.expire(&worker_id, unit_id, token);
            }
            SceneCommand::Snapshot { reply } => {
                let _ = reply.send(self.scheduler.progress());
            }
            SceneCommand::Shutdown => {
                info!(scene_id = %scene_id, "Scene shutting down");
                return false;
            }
        }

        true
    }

    fn depart(&mut self, worker_id: &WorkerId, departure: Departure) {
        let scene_id = self.scheduler.spec().id;
        if !self.scheduler.remove_worker(worker_id, departure) {
            return;
        }
        if let Err(e) = self.ctx.ledger.worker_left(&scene_id) {
            warn!(scene_id = %scene_id, "Failed to record worker departure: {}", e);
        }
    }

    async fn finish(&mut self, rendered: RenderedScene) {
        let scene_id = rendered.spec.id;

        let timer = self.ctx.metrics.finalize_duration.start_timer();
        let artifact = match self.ctx.finalizer.finalize(rendered).await {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                error!(scene_id = %scene_id, "Failed to finalize scene: {:#}", e);
                None
            }
        };
        timer.observe_duration();
        self.ctx.metrics.scenes_finalized_total.inc();

        let notified = self.scheduler.broadcast_finished(artifact);
        info!(scene_id = %scene_id, notified, "Scene finished");
    }
}
