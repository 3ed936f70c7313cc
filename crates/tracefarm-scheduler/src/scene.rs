use crate::connection::Connection;
use crate::finalizer::{RenderedScene, RenderedUnit};
use crate::metrics::SchedulerMetrics;
use crate::timeout::{TimeoutDriver, TimeoutToken};
use crate::units::{StoreOutcome, UnitRegistry};
use crate::worker_registry::WorkerRegistry;
use serde::Serialize;
use std::sync::Arc;
use tracefarm_core::{partition, Pixel, SceneId, SceneSpec, SchedulingError, UnitId, WorkerId};
use tracefarm_protocol::{ServerEvent, UnitDescriptor};
use tracing::{debug, info, warn};

/// Lifetime of a scene. `Finalized` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneState {
    Active,
    Finalized,
}

/// Why a unit went back on the pending queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    Timeout,
    Leave,
    Disconnect,
    /// The holder asked for a different unit before its timeout fired
    Abandoned,
}

impl RequeueReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequeueReason::Timeout => "timeout",
            RequeueReason::Leave => "leave",
            RequeueReason::Disconnect => "disconnect",
            RequeueReason::Abandoned => "abandoned",
        }
    }
}

/// How a worker left a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Explicit leave event
    Leave,
    /// Transport closed
    Disconnect,
}

impl Departure {
    fn requeue_reason(self) -> RequeueReason {
        match self {
            Departure::Leave => RequeueReason::Leave,
            Departure::Disconnect => RequeueReason::Disconnect,
        }
    }
}

/// Result of a unit submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { scene_complete: bool },
    /// Unit already had an accepted result
    Duplicate,
    UnknownUnit,
    /// Submitter is not (or no longer) part of the scene
    UnknownWorker,
    /// Scene already finalized
    SceneClosed,
}

/// Point-in-time view of a scene's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneProgress {
    pub scene_id: SceneId,
    pub width: u32,
    pub height: u32,
    pub state: SceneState,
    pub units_total: usize,
    pub units_completed: usize,
    pub workers: usize,
}

/// Work scheduler for a single scene.
///
/// Owns the unit registry, the worker registry and the pending queue. Every
/// method is expected to run on the scene's actor, one call at a time.
pub struct SceneScheduler {
    spec: SceneSpec,
    state: SceneState,
    units: UnitRegistry,
    workers: WorkerRegistry,
    timers: TimeoutDriver,
    metrics: Arc<SchedulerMetrics>,
    rendered: Option<RenderedScene>,
}

impl SceneScheduler {
    /// Partition the scene and queue every unit
    pub fn new(
        spec: SceneSpec,
        chunk_size: u32,
        timers: TimeoutDriver,
        metrics: Arc<SchedulerMetrics>,
    ) -> Result<Self, SchedulingError> {
        let units = partition(spec.width, spec.height, chunk_size)?;

        Ok(SceneScheduler {
            spec,
            state: SceneState::Active,
            units: UnitRegistry::new(units),
            workers: WorkerRegistry::new(),
            timers,
            metrics,
            rendered: None,
        })
    }

    pub fn spec(&self) -> &SceneSpec {
        &self.spec
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == SceneState::Finalized
    }

    pub fn units(&self) -> &UnitRegistry {
        &self.units
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    /// Add a worker and send it its identity
    pub fn join(&mut self, owner_id: &str, connection: Connection) -> Option<WorkerId> {
        if self.is_finalized() {
            debug!(scene_id = %self.spec.id, "Join for finalized scene ignored");
            return None;
        }

        let worker_id = self.workers.register(owner_id, connection.clone());
        connection.send(ServerEvent::Identity {
            scene_id: self.spec.id,
            worker_id: worker_id.clone(),
        });
        self.metrics.workers_connected.inc();

        info!(scene_id = %self.spec.id, worker_id = %worker_id, "Worker joined scene");
        Some(worker_id)
    }

    /// Handle the identity echo: the worker is ready for its first unit
    pub fn register(&mut self, worker_id: &WorkerId) -> bool {
        let Some(slot) = self.workers.get_mut(worker_id) else {
            debug!(scene_id = %self.spec.id, worker_id = %worker_id, "Registration from unknown worker");
            return false;
        };

        let already = slot.registered;
        slot.registered = true;
        if already && slot.assignment.is_some() {
            return false;
        }

        self.request_unit(worker_id)
    }

    /// Hand the worker the next incomplete unit from the queue.
    ///
    /// Returns false when the queue holds nothing left to do. A unit the
    /// worker was still holding is released first.
    pub fn request_unit(&mut self, worker_id: &WorkerId) -> bool {
        if self.is_finalized() {
            debug!(scene_id = %self.spec.id, worker_id = %worker_id, "Unit request for finalized scene");
            return false;
        }
        if !self.workers.contains(worker_id) {
            debug!(scene_id = %self.spec.id, worker_id = %worker_id, "Unit request from unknown worker");
            return false;
        }

        self.release_assignment(worker_id, RequeueReason::Abandoned);

        let Some(slot) = self.workers.get_mut(worker_id) else {
            return false;
        };
        slot.registered = true;
        let Some(unit) = self.units.next_pending() else {
            debug!(scene_id = %self.spec.id, worker_id = %worker_id, "No pending units");
            return false;
        };

        slot.assignment = Some(unit.id);
        slot.timeout = Some(self.timers.arm(worker_id.clone(), unit.id));
        slot.connection.send(ServerEvent::UnitAssignment {
            scene_id: self.spec.id,
            unit: UnitDescriptor::from(&unit),
        });
        self.units.add_claimant(unit.id, worker_id.clone());
        self.metrics.units_assigned_total.inc();

        debug!(
            scene_id = %self.spec.id,
            worker_id = %worker_id,
            unit_id = unit.id,
            "Assigned unit"
        );
        true
    }

    /// Handle a fired assignment timeout.
    ///
    /// The unit goes back on the queue tail unless the timeout was cancelled
    /// or superseded, or the unit was completed in the meantime. The worker
    /// keeps its claim and may still deliver.
    pub fn expire(&mut self, worker_id: &WorkerId, unit_id: UnitId, token: TimeoutToken) -> bool {
        if self.is_finalized() {
            return false;
        }

        let Some(slot) = self.workers.get_mut(worker_id) else {
            debug!(scene_id = %self.spec.id, worker_id = %worker_id, "Timeout for departed worker");
            return false;
        };
        if slot.timeout.as_ref().map(|t| t.token) != Some(token) {
            debug!(scene_id = %self.spec.id, worker_id = %worker_id, unit_id, "Stale timeout ignored");
            return false;
        }
        slot.timeout = None;

        if slot.assignment != Some(unit_id) || self.units.is_completed(unit_id) {
            return false;
        }

        warn!(
            scene_id = %self.spec.id,
            worker_id = %worker_id,
            unit_id,
            "Worker did not return unit in time, requeueing"
        );

        if !self.units.enqueue(unit_id) {
            return false;
        }
        self.metrics.inc_requeued(RequeueReason::Timeout.as_str());
        self.wake_idle_workers();
        true
    }

    /// Store a worker's result for a unit.
    ///
    /// The first result for a unit wins; later ones are dropped. On acceptance
    /// every other worker still assigned to the unit is moved on, the
    /// submitter gets its next unit, and the scene is finalized once all
    /// units are complete.
    pub fn submit_result(
        &mut self,
        worker_id: &WorkerId,
        unit_id: UnitId,
        pixels: Vec<Pixel>,
    ) -> SubmitOutcome {
        if self.is_finalized() {
            self.metrics.inc_discarded("closed");
            return SubmitOutcome::SceneClosed;
        }
        if !self.workers.contains(worker_id) {
            debug!(scene_id = %self.spec.id, worker_id = %worker_id, unit_id, "Result from unknown worker");
            self.metrics.inc_discarded("unknown_worker");
            return SubmitOutcome::UnknownWorker;
        }

        match self.units.complete(unit_id, pixels) {
            StoreOutcome::Accepted => {}
            StoreOutcome::UnknownUnit => {
                debug!(scene_id = %self.spec.id, worker_id = %worker_id, unit_id, "Result for unknown unit");
                self.metrics.inc_discarded("unknown_unit");
                return SubmitOutcome::UnknownUnit;
            }
            StoreOutcome::AlreadyCompleted => {
                debug!(scene_id = %self.spec.id, worker_id = %worker_id, unit_id, "Discarding duplicate result");
                self.metrics.inc_discarded("duplicate");

                let waiting = self
                    .workers
                    .get(worker_id)
                    .map(|w| w.assignment == Some(unit_id) || w.is_idle())
                    .unwrap_or(false);
                if waiting {
                    self.request_unit(worker_id);
                }
                return SubmitOutcome::Duplicate;
            }
        }

        self.metrics.units_completed_total.inc();
        if let Some(slot) = self.workers.get_mut(worker_id) {
            slot.units_completed += 1;
            if slot.assignment == Some(unit_id) {
                slot.cancel_timeout();
                slot.assignment = None;
            }
        }
        debug!(scene_id = %self.spec.id, worker_id = %worker_id, unit_id, "Accepted result");

        for other in self.units.claimants(unit_id) {
            if &other == worker_id {
                continue;
            }
            let Some(slot) = self.workers.get_mut(&other) else {
                continue;
            };
            if slot.assignment != Some(unit_id) {
                continue;
            }
            slot.cancel_timeout();
            slot.assignment = None;
            debug!(scene_id = %self.spec.id, worker_id = %other, unit_id, "Moving co-claimant on");
            self.request_unit(&other);
        }

        if self.check_completion() {
            return SubmitOutcome::Accepted { scene_complete: true };
        }

        let idle = self
            .workers
            .get(worker_id)
            .map(|w| w.assignment.is_none())
            .unwrap_or(false);
        if idle {
            self.request_unit(worker_id);
        }

        SubmitOutcome::Accepted { scene_complete: false }
    }

    /// Remove a worker, putting its unfinished unit back on the queue
    pub fn remove_worker(&mut self, worker_id: &WorkerId, departure: Departure) -> bool {
        if !self.workers.contains(worker_id) {
            debug!(scene_id = %self.spec.id, worker_id = %worker_id, "Departure of unknown worker");
            return false;
        }

        let requeued = self.release_assignment(worker_id, departure.requeue_reason());
        self.workers.remove(worker_id);
        self.units.release_claims(worker_id);
        self.metrics.workers_connected.dec();

        info!(scene_id = %self.spec.id, worker_id = %worker_id, ?departure, "Worker left scene");

        if requeued.is_some() {
            self.wake_idle_workers();
        }
        true
    }

    /// The assembled scene, available once after finalization
    pub fn take_rendered(&mut self) -> Option<RenderedScene> {
        self.rendered.take()
    }

    /// Tell every joined worker the scene is done
    pub fn broadcast_finished(&self, artifact: Option<String>) -> usize {
        self.workers.broadcast(&ServerEvent::SceneFinished {
            scene_id: self.spec.id,
            artifact,
        })
    }

    /// Cancel all outstanding timeouts
    pub fn shutdown(&mut self) {
        self.workers.cancel_all_timeouts();
    }

    pub fn progress(&self) -> SceneProgress {
        SceneProgress {
            scene_id: self.spec.id,
            width: self.spec.width,
            height: self.spec.height,
            state: self.state,
            units_total: self.units.len(),
            units_completed: self.units.completed_count(),
            workers: self.workers.count(),
        }
    }

    /// Clear the worker's assignment and cancel its timeout, requeueing the
    /// unit if it is still incomplete. An abandoned unit whose timeout already
    /// fired was requeued at that point and is left alone.
    fn release_assignment(&mut self, worker_id: &WorkerId, reason: RequeueReason) -> Option<UnitId> {
        let slot = self.workers.get_mut(worker_id)?;
        let armed = slot.cancel_timeout();
        let unit_id = slot.assignment.take()?;

        if reason == RequeueReason::Abandoned && !armed {
            return None;
        }
        if !self.units.enqueue(unit_id) {
            return None;
        }

        self.metrics.inc_requeued(reason.as_str());
        info!(
            scene_id = %self.spec.id,
            worker_id = %worker_id,
            unit_id,
            reason = reason.as_str(),
            "Unit requeued"
        );
        Some(unit_id)
    }

    /// Offer queued units to registered workers that hold nothing
    fn wake_idle_workers(&mut self) {
        for worker_id in self.workers.idle_workers() {
            if !self.units.has_pending() {
                break;
            }
            self.request_unit(&worker_id);
        }
    }

    fn check_completion(&mut self) -> bool {
        if self.is_finalized() || !self.units.all_completed() {
            return false;
        }

        self.state = SceneState::Finalized;
        self.workers.cancel_all_timeouts();

        let units = self
            .units
            .take_results()
            .into_iter()
            .map(|(unit, pixels)| RenderedUnit { unit, pixels })
            .collect();
        self.rendered = Some(RenderedScene {
            spec: self.spec,
            units,
        });

        info!(scene_id = %self.spec.id, units = self.units.len(), "All units complete, scene finalized");
        true
    }
}
