//! WebSocket connection lifecycle for `/issueSummary`.
//!
//! The channel is push-only: client messages other than close are ignored.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::Outbound;
use crate::state::GatewayState;

/// Handle a new WebSocket subscriber.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New issue summary subscriber");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Outbound>();
    state.hub.register(&conn_id, event_tx).await;

    // Spawn event sender task
    let cancel = state.cancel.clone();
    let mut send_task = state.tasks.spawn(async move {
        loop {
            let outbound = tokio::select! {
                _ = cancel.cancelled() => Outbound::Close,
                next = event_rx.recv() => next.unwrap_or(Outbound::Close),
            };
            match outbound {
                Outbound::Text(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "server shutting down".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Read loop: only watches for the client going away.
    loop {
        tokio::select! {
            _ = &mut send_task => break,
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    debug!(conn_id = %conn_id, "Client closed");
                    break;
                }
                Some(Err(e)) => {
                    debug!(conn_id = %conn_id, %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.unregister(&conn_id).await;
    send_task.abort();
    info!(conn_id = %conn_id, "Issue summary subscriber disconnected");
}
