use crate::connection::Connection;
use crate::timeout::PendingTimeout;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracefarm_core::{UnitId, WorkerId};
use tracefarm_protocol::ServerEvent;

/// A worker joined to one scene
#[derive(Debug)]
pub struct WorkerSlot {
    pub worker_id: WorkerId,
    pub connection: Connection,
    /// Unit the worker is currently expected to render
    pub assignment: Option<UnitId>,
    pub timeout: Option<PendingTimeout>,
    /// Set once the worker has echoed its identity
    pub registered: bool,
    pub joined_at: DateTime<Utc>,
    pub units_completed: u32,
}

impl WorkerSlot {
    fn new(worker_id: WorkerId, connection: Connection) -> Self {
        WorkerSlot {
            worker_id,
            connection,
            assignment: None,
            timeout: None,
            registered: false,
            joined_at: Utc::now(),
            units_completed: 0,
        }
    }

    /// Cancel the pending timeout, if any. Returns true if one was armed.
    pub fn cancel_timeout(&mut self) -> bool {
        match self.timeout.take() {
            Some(timeout) => {
                timeout.cancel();
                true
            }
            None => false,
        }
    }

    /// Registered and holding nothing
    pub fn is_idle(&self) -> bool {
        self.registered && self.assignment.is_none()
    }
}

/// Registry of the workers joined to a single scene.
///
/// Owned by the scene's scheduler; all access happens on the scene actor.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerSlot>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry {
            workers: BTreeMap::new(),
        }
    }

    /// Smallest free `"<owner>-<n>"` id for this owner
    pub fn allocate_id(&self, owner_id: &str) -> WorkerId {
        let mut slot = 0;
        loop {
            let candidate = WorkerId::new(owner_id, slot);
            if !self.workers.contains_key(&candidate) {
                return candidate;
            }
            slot += 1;
        }
    }

    /// Register a new worker under a freshly allocated id
    pub fn register(&mut self, owner_id: &str, connection: Connection) -> WorkerId {
        let worker_id = self.allocate_id(owner_id);
        self.workers
            .insert(worker_id.clone(), WorkerSlot::new(worker_id.clone(), connection));
        worker_id
    }

    /// Remove a worker; the caller is responsible for its assignment
    pub fn remove(&mut self, worker_id: &WorkerId) -> Option<WorkerSlot> {
        self.workers.remove(worker_id)
    }

    pub fn get(&self, worker_id: &WorkerId) -> Option<&WorkerSlot> {
        self.workers.get(worker_id)
    }

    pub fn get_mut(&mut self, worker_id: &WorkerId) -> Option<&mut WorkerSlot> {
        self.workers.get_mut(worker_id)
    }

    pub fn contains(&self, worker_id: &WorkerId) -> bool {
        self.workers.contains_key(worker_id)
    }

    /// Registered workers without an assignment, in id order
    pub fn idle_workers(&self) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.is_idle())
            .map(|w| w.worker_id.clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.workers.len()
    }

    /// Send an event to every joined worker
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        self.workers
            .values()
            .filter(|w| w.connection.send(event.clone()))
            .count()
    }

    /// Cancel every pending timeout
    pub fn cancel_all_timeouts(&mut self) {
        for worker in self.workers.values_mut() {
            worker.cancel_timeout();
        }
    }
}
