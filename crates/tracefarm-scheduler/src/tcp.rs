use crate::dispatch::Dispatcher;
use crate::session::Session;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracefarm_protocol::{ProtocolError, ServerCodec};
use tracing::{debug, error, info, warn};

/// Accept native worker connections until `shutdown` is cancelled
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!("Worker endpoint listening on {}", addr);
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!("New worker connection from {}", addr);
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher).await {
                                error!("Worker connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("Shutting down worker endpoint");
                break;
            }
        }
    }
}

/// Drive one worker connection: frames in, session events out
pub async fn handle_connection(stream: TcpStream, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let (mut sink, mut frames) = Framed::new(stream, ServerCodec::new()).split();
    let (mut session, mut outbound) = Session::open(dispatcher);
    let connection_id = session.connection_id();

    let send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            if let Err(e) = sink.send(event).await {
                debug!(connection = %connection_id, "Worker sink closed: {}", e);
                break;
            }
        }
    });

    let mut result = Ok(());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(event) => session.handle(event).await,
            // the frame was consumed, so the stream is still aligned
            Err(ProtocolError::SerializationError(e)) => {
                warn!(connection = %connection_id, "Dropping malformed event: {}", e);
            }
            Err(e) => {
                result = Err(e.into());
                break;
            }
        }
    }

    session.close();
    send_task.abort();
    debug!(connection = %connection_id, "Worker connection closed");
    result
}
