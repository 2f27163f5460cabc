use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::AppState;

/// Streams every finalized order as JSON.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| stream_order_updates(socket, state))
}

async fn stream_order_updates(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.order_updates_tx.subscribe();

    info!("order update subscriber connected");

    let send_task = tokio::spawn(async move {
        loop {
            let order = match updates.recv().await {
                Ok(order) => order,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "order update subscriber lagging");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&order) {
                Ok(json) => json,
                Err(err) => {
                    warn!(order_id = order.id, error = %err, "failed to serialize order update");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    first_to_finish(send_task, recv_task).await;

    info!("order update subscriber disconnected");
}

/// Waits for either task and aborts the other one.
async fn first_to_finish(mut a: JoinHandle<()>, mut b: JoinHandle<()>) {
    tokio::select! {
        _ = &mut a => b.abort(),
        _ = &mut b => a.abort(),
    }
}
