use crate::actor::SceneCommand;
use crate::connection::{Connection, ConnectionId};
use crate::dispatch::Dispatcher;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracefarm_core::{SceneId, WorkerId};
use tracefarm_protocol::{ClientEvent, ServerEvent};
use tracing::debug;

/// Per-connection state shared by every transport.
///
/// Tracks which (scene, worker) pairs were joined over this connection so
/// events naming someone else's worker are refused and all of them can be
/// dropped when the transport closes. Pairs for scenes that have finished
/// are pruned on the next join.
pub struct Session {
    connection: Connection,
    dispatcher: Arc<Dispatcher>,
    bindings: HashSet<(SceneId, WorkerId)>,
}

impl Session {
    /// Returns the session and the stream of events to write to the transport
    pub fn open(dispatcher: Arc<Dispatcher>) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (connection, outbound) = Connection::new();
        let session = Session {
            connection,
            dispatcher,
            bindings: HashSet::new(),
        };
        (session, outbound)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn bindings(&self) -> impl Iterator<Item = &(SceneId, WorkerId)> {
        self.bindings.iter()
    }

    pub async fn handle(&mut self, event: ClientEvent) {
        if let Err(e) = event.validate() {
            debug!(connection = %self.connection.id(), "Rejected event: {}", e);
            return;
        }

        match event {
            ClientEvent::JoinScene { scene_id, owner_id } => {
                self.prune_finished();
                let joined = self
                    .dispatcher
                    .join(scene_id, owner_id, self.connection.clone())
                    .await;
                if let Some(worker_id) = joined {
                    self.bindings.insert((scene_id, worker_id));
                }
            }
            ClientEvent::Registered { scene_id, worker_id } => {
                if self.is_bound(scene_id, &worker_id) {
                    self.dispatcher
                        .route(scene_id, SceneCommand::Registered { worker_id });
                }
            }
            ClientEvent::UnitResult {
                scene_id,
                worker_id,
                unit_id,
                pixels,
            } => {
                if self.is_bound(scene_id, &worker_id) {
                    self.dispatcher.route(
                        scene_id,
                        SceneCommand::SubmitResult {
                            worker_id,
                            unit_id,
                            pixels,
                        },
                    );
                }
            }
            ClientEvent::RequestUnit { scene_id, worker_id } => {
                if self.is_bound(scene_id, &worker_id) {
                    self.dispatcher
                        .route(scene_id, SceneCommand::RequestUnit { worker_id });
                }
            }
            ClientEvent::LeaveScene { scene_id, worker_id } => {
                if self.bindings.remove(&(scene_id, worker_id.clone())) {
                    self.dispatcher
                        .route(scene_id, SceneCommand::Leave { worker_id });
                } else {
                    debug!(scene_id = %scene_id, worker_id = %worker_id, "Leave for unbound worker");
                }
            }
        }
    }

    /// Transport closed: drop every worker joined over this connection
    pub fn close(mut self) {
        self.prune_finished();
        debug!(
            connection = %self.connection.id(),
            workers = self.bindings.len(),
            "Closing session"
        );
        for (scene_id, worker_id) in self.bindings {
            self.dispatcher
                .route(scene_id, SceneCommand::Disconnect { worker_id });
        }
    }

    fn prune_finished(&mut self) {
        let dispatcher = &self.dispatcher;
        self.bindings.retain(|(scene_id, _)| dispatcher.is_active(scene_id));
    }

    fn is_bound(&self, scene_id: SceneId, worker_id: &WorkerId) -> bool {
        let bound = self.bindings.contains(&(scene_id, worker_id.clone()));
        if !bound {
            debug!(scene_id = %scene_id, worker_id = %worker_id, "Event for worker not joined on this connection");
        }
        bound
    }
}
