use crate::actor::SceneCommand;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracefarm_core::{UnitId, WorkerId};

/// Token identifying one armed timeout. A firing whose token no longer
/// matches the worker's pending timeout is stale.
pub type TimeoutToken = u64;

/// A timeout that has been armed for a (worker, unit) assignment
#[derive(Debug)]
pub struct PendingTimeout {
    pub token: TimeoutToken,
    pub unit_id: UnitId,
    handle: AbortHandle,
}

impl PendingTimeout {
    pub fn cancel(self) {
        self.handle.abort();
    }
}

/// Arms assignment timeouts that fire back into the owning scene's command
/// channel, so expiry is handled in the same serialized stream as every other
/// event for the scene.
#[derive(Debug, Clone)]
pub struct TimeoutDriver {
    inbox: mpsc::UnboundedSender<SceneCommand>,
    tolerance: Duration,
    next_token: TimeoutToken,
}

impl TimeoutDriver {
    pub fn new(inbox: mpsc::UnboundedSender<SceneCommand>, tolerance: Duration) -> Self {
        TimeoutDriver {
            inbox,
            tolerance,
            next_token: 0,
        }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Start the timer for `worker_id` holding `unit_id`
    pub fn arm(&mut self, worker_id: WorkerId, unit_id: UnitId) -> PendingTimeout {
        let token = self.next_token;
        self.next_token += 1;

        let inbox = self.inbox.clone();
        let tolerance = self.tolerance;
        let task = tokio::spawn(async move {
            tokio::time::sleep(tolerance).await;
            // the scene may already be gone; nothing to do then
            let _ = inbox.send(SceneCommand::AssignmentExpired {
                worker_id,
                unit_id,
                token,
            });
        });

        PendingTimeout {
            token,
            unit_id,
            handle: task.abort_handle(),
        }
    }
}
