use std::sync::Arc;

use axum::{debug_handler, extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade}, response::IntoResponse};
use futures_util::{SinkExt, StreamExt};

use crate::{config::Config, hub::Hub, protocol::ClientEvent};

#[debug_handler(state = crate::AppState)]
pub async fn channel_ws(
    State(hub): State<Arc<Hub>>,
    State(config): State<Arc<Config>>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(config.max_upload_bytes)
        .on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Run one connection until its socket closes, then release its membership.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (id, mut outbox) = hub.connect().await;
    let evicted = hub.registry().eviction(id).await.unwrap_or_default();
    tracing::info!(connection = %id, "connected");

    let (mut sender, mut receiver) = socket.split();

    let mut writer_task = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let json = match serde_json::to_string(&*event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "unserializable event skipped");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let parsed = match frame {
                    Some(Ok(Message::Text(text))) => ClientEvent::from_slice(text.as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => ClientEvent::from_slice(&bytes),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection = %id, error = %e, "socket error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                };
                match parsed {
                    Ok(event) => hub.dispatch(id, event).await,
                    Err(e) => tracing::debug!(connection = %id, error = %e, "frame dropped"),
                }
            }
            // writer gave up: the socket can no longer be written to
            _ = &mut writer_task => break,
            _ = evicted.cancelled() => {
                tracing::info!(connection = %id, "evicted, too far behind");
                break;
            }
        }
    }

    hub.disconnect(id).await;
    writer_task.abort();
}
