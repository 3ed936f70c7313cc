use tokio::sync::mpsc;
use tracefarm_protocol::ServerEvent;
use tracing::debug;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound half of a worker's transport connection.
///
/// Cloned into every worker slot bound to the connection. The transport task
/// owns the receiving half and writes events to the socket.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<ServerEvent>,
}

impl Connection {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection {
            id: Uuid::new_v4(),
            outbound: tx,
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event for the worker. Returns false once the transport is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        if self.outbound.send(event).is_err() {
            debug!("Connection {} closed, dropping outbound event", self.id);
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}
