use crate::api::AppState;
use crate::dispatch::Dispatcher;
use crate::session::Session;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracefarm_protocol::{decode_text, encode_text};
use tracing::{debug, info, warn};

/// Upgrade to a worker WebSocket carrying JSON text frames
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.dispatcher))
}

async fn handle_socket(socket: WebSocket, dispatcher: Arc<Dispatcher>) {
    let (mut session, mut outbound) = Session::open(dispatcher);
    let connection_id = session.connection_id();
    info!(connection = %connection_id, "Worker WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match encode_text(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection = %connection_id, "Failed to encode event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                debug!(connection = %connection_id, "WebSocket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => match decode_text(&text) {
                Ok(event) => session.handle(event).await,
                Err(e) => debug!(connection = %connection_id, "Dropping malformed event: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    session.close();
    send_task.abort();
    info!(connection = %connection_id, "Worker WebSocket disconnected");
}
