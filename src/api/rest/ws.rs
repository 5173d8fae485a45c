use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::realtime::channel::Outbound;
use crate::realtime::gateway::{GatewayReply, Inbound};
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut rx) = state.gateway.connect();

    info!(connection_id = %connection, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let json = match serde_json::to_string(&outbound) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize realtime message");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let inbound = match serde_json::from_str::<Inbound>(&text) {
                Ok(inbound) => inbound,
                Err(err) => {
                    recv_state.channel.send_to(
                        connection,
                        Outbound::Error {
                            code: "bad_request".to_string(),
                            message: format!("malformed message: {err}"),
                        },
                    );
                    continue;
                }
            };

            match recv_state.gateway.handle(connection, inbound).await {
                GatewayReply::Send(reply) => {
                    recv_state.channel.send_to(connection, reply);
                }
                GatewayReply::Close => break,
            }
        }
    });

    until_either_exits(send_task, recv_task).await;

    state.gateway.disconnect(connection);
    info!(connection_id = %connection, "websocket client disconnected");
}

/// Waits for either half of a socket to stop, then aborts the other.
async fn until_either_exits(mut first: JoinHandle<()>, mut second: JoinHandle<()>) {
    tokio::select! {
        _ = &mut first => second.abort(),
        _ = &mut second => first.abort(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::until_either_exits;

    #[tokio::test]
    async fn finished_half_aborts_the_other() {
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let stuck = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        let done = tokio::spawn(async {});

        tokio::time::timeout(Duration::from_secs(1), until_either_exits(done, stuck))
            .await
            .unwrap();

        // The aborted task drops its sender.
        let dropped = tokio::time::timeout(Duration::from_secs(1), alive_rx)
            .await
            .unwrap();
        assert!(dropped.is_err());
    }
}
