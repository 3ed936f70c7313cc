use std::collections::{BTreeSet, VecDeque};
use tracefarm_core::{Pixel, UnitId, WorkUnit, WorkerId};

/// State of a single unit of work within a scene
#[derive(Debug, Clone)]
pub struct UnitState {
    pub unit: WorkUnit,
    /// Never cleared once set
    pub completed: bool,
    /// Workers that were handed this unit and have not left the scene
    pub claimants: BTreeSet<WorkerId>,
    result: Option<Vec<Pixel>>,
    queued: bool,
}

/// Outcome of storing a result for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Accepted,
    AlreadyCompleted,
    UnknownUnit,
}

/// Per-scene unit table plus the queue of units waiting for a worker.
///
/// A unit id is in the queue at most once. Completed units may linger in the
/// queue and are skipped when popped.
#[derive(Debug)]
pub struct UnitRegistry {
    units: Vec<UnitState>,
    pending: VecDeque<UnitId>,
}

impl UnitRegistry {
    /// Build the registry and queue every unit in id order
    pub fn new(units: Vec<WorkUnit>) -> Self {
        let mut registry = UnitRegistry {
            units: units
                .into_iter()
                .map(|unit| UnitState {
                    unit,
                    completed: false,
                    claimants: BTreeSet::new(),
                    result: None,
                    queued: false,
                })
                .collect(),
            pending: VecDeque::new(),
        };
        for id in 0..registry.units.len() as UnitId {
            registry.enqueue(id);
        }
        registry
    }

    pub fn get(&self, unit_id: UnitId) -> Option<&UnitState> {
        self.units.get(unit_id as usize)
    }

    pub fn contains(&self, unit_id: UnitId) -> bool {
        self.get(unit_id).is_some()
    }

    pub fn is_completed(&self, unit_id: UnitId) -> bool {
        self.get(unit_id).map(|u| u.completed).unwrap_or(false)
    }

    /// Push a unit on the queue tail. Returns false if it is unknown,
    /// completed or already waiting in the queue.
    pub fn enqueue(&mut self, unit_id: UnitId) -> bool {
        match self.units.get_mut(unit_id as usize) {
            Some(state) if !state.completed && !state.queued => {
                state.queued = true;
                self.pending.push_back(unit_id);
                true
            }
            _ => false,
        }
    }

    /// Pop the queue until an incomplete unit turns up
    pub fn next_pending(&mut self) -> Option<WorkUnit> {
        while let Some(unit_id) = self.pending.pop_front() {
            let state = &mut self.units[unit_id as usize];
            state.queued = false;
            if !state.completed {
                return Some(state.unit);
            }
        }
        None
    }

    /// True if some incomplete unit is waiting in the queue
    pub fn has_pending(&self) -> bool {
        self.pending
            .iter()
            .any(|id| !self.units[*id as usize].completed)
    }

    /// Queue contents, head first
    pub fn pending_ids(&self) -> Vec<UnitId> {
        self.pending.iter().copied().collect()
    }

    pub fn add_claimant(&mut self, unit_id: UnitId, worker_id: WorkerId) {
        if let Some(state) = self.units.get_mut(unit_id as usize) {
            state.claimants.insert(worker_id);
        }
    }

    /// Drop a worker from every claimant set
    pub fn release_claims(&mut self, worker_id: &WorkerId) {
        for state in &mut self.units {
            state.claimants.remove(worker_id);
        }
    }

    pub fn claimants(&self, unit_id: UnitId) -> Vec<WorkerId> {
        self.get(unit_id)
            .map(|s| s.claimants.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Store the first result for a unit; later ones are refused
    pub fn complete(&mut self, unit_id: UnitId, pixels: Vec<Pixel>) -> StoreOutcome {
        match self.units.get_mut(unit_id as usize) {
            None => StoreOutcome::UnknownUnit,
            Some(state) if state.completed => StoreOutcome::AlreadyCompleted,
            Some(state) => {
                state.completed = true;
                state.result = Some(pixels);
                StoreOutcome::Accepted
            }
        }
    }

    pub fn all_completed(&self) -> bool {
        self.units.iter().all(|s| s.completed)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.units.iter().filter(|s| s.completed).count()
    }

    /// Move every stored result out, in unit order
    pub fn take_results(&mut self) -> Vec<(WorkUnit, Vec<Pixel>)> {
        self.units
            .iter_mut()
            .filter_map(|s| s.result.take().map(|pixels| (s.unit, pixels)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracefarm_core::partition;

    fn registry() -> UnitRegistry {
        UnitRegistry::new(partition(100, 100, 2500).unwrap())
    }

    fn pixel() -> Pixel {
        Pixel { x: 0, y: 0, r: 1.0, g: 1.0, b: 1.0 }
    }

    #[test]
    fn test_queue_starts_in_id_order() {
        let mut units = registry();
        assert_eq!(units.pending_ids(), vec![0, 1, 2, 3]);
        assert_eq!(units.next_pending().unwrap().id, 0);
        assert_eq!(units.next_pending().unwrap().id, 1);
    }

    #[test]
    fn test_completed_entries_are_skipped() {
        let mut units = registry();
        assert_eq!(units.complete(0, vec![pixel()]), StoreOutcome::Accepted);
        assert_eq!(units.complete(1, vec![pixel()]), StoreOutcome::Accepted);

        assert!(units.has_pending());
        assert_eq!(units.next_pending().unwrap().id, 2);
    }

    #[test]
    fn test_enqueue_is_deduplicated() {
        let mut units = registry();
        let first = units.next_pending().unwrap();

        assert!(units.enqueue(first.id));
        assert!(!units.enqueue(first.id));
        assert_eq!(units.pending_ids(), vec![1, 2, 3, 0]);

        // completed and unknown units never go back on the queue
        units.complete(1, vec![]);
        assert!(!units.enqueue(1));
        assert!(!units.enqueue(99));
    }

    #[test]
    fn test_first_result_wins() {
        let mut units = registry();
        let first = vec![Pixel { x: 1, ..pixel() }];
        let second = vec![Pixel { x: 2, ..pixel() }];

        assert_eq!(units.complete(0, first.clone()), StoreOutcome::Accepted);
        assert_eq!(units.complete(0, second), StoreOutcome::AlreadyCompleted);
        assert_eq!(units.complete(42, vec![]), StoreOutcome::UnknownUnit);

        let results = units.take_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, first);
    }

    #[test]
    fn test_exhausted_queue() {
        let mut units = registry();
        for id in 0..4 {
            units.complete(id, vec![]);
        }
        assert!(units.all_completed());
        assert!(!units.has_pending());
        assert!(units.next_pending().is_none());
        assert!(units.pending_ids().is_empty());
    }

    #[test]
    fn test_claims() {
        let mut units = registry();
        let a = WorkerId::new("a", 0);
        let b = WorkerId::new("b", 0);

        units.add_claimant(0, a.clone());
        units.add_claimant(0, b.clone());
        units.add_claimant(1, a.clone());
        assert_eq!(units.claimants(0), vec![a.clone(), b.clone()]);

        units.release_claims(&a);
        assert_eq!(units.claimants(0), vec![b]);
        assert!(units.claimants(1).is_empty());
    }
}
