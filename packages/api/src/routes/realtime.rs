use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

#[tracing::instrument(name = "GET /realtime", skip(state, ws))]
pub async fn realtime(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut rx = match state.channel.subscribe().await {
        Ok(rx) => rx,
        Err(err) => {
            tracing::error!("Failed to subscribe realtime client: {}", err);
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            published = rx.recv() => match published {
                Ok(message) => {
                    let payload = match serde_json::to_string(&message) {
                        Ok(payload) => payload,
                        Err(err) => {
                            tracing::error!("Failed to encode channel message: {}", err);
                            continue;
                        }
                    };
                    // a dead client only ends its own forward loop
                    if sink.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Realtime client lagged, dropping missed messages");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // the topic is broadcast-only; client frames are ignored
                Some(Ok(_)) => {}
            },
        }
    }

    if let Err(err) = state.channel.unsubscribe().await {
        tracing::error!("Failed to unsubscribe realtime client: {}", err);
    }
}
