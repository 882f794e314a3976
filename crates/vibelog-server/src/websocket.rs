//! WebSocket push channel for live notifications.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::notifications::Subscription;
use crate::state::CollectorState;

/// Handle WebSocket upgrade request for /mcp/notifications.
pub async fn notifications_upgrade(
    State(state): State<Arc<CollectorState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Handle an active WebSocket connection.
async fn handle_ws_connection(socket: WebSocket, state: Arc<CollectorState>) {
    let (mut sender, mut receiver) = socket.split();

    let subscription = state.broadcaster().subscribe();
    let subscriber = subscription.id();
    let ping_interval = state.config().ws_ping_interval;
    info!(subscriber, "Notification listener connected");

    let mut send_task = tokio::spawn(async move {
        forward_notifications(&mut sender, subscription, ping_interval).await;
    });

    let mut recv_task = tokio::spawn(async move {
        drain_incoming(&mut receiver).await;
    });

    // Whichever side finishes first ends the connection; the other task
    // (and with it the subscription) goes too.
    tokio::select! {
        _ = &mut send_task => {
            debug!(subscriber, "WebSocket send task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!(subscriber, "WebSocket receive task completed");
            send_task.abort();
        }
    }

    info!(subscriber, "Notification listener disconnected");
}

/// Forward notifications to the WebSocket, one text frame each.
async fn forward_notifications(
    sender: &mut SplitSink<WebSocket, Message>,
    mut subscription: Subscription,
    ping_interval: Duration,
) {
    let mut ping_timer = interval(ping_interval);
    ping_timer.tick().await;

    loop {
        tokio::select! {
            next = subscription.recv() => {
                let Some(notification) = next else {
                    debug!("Subscriber dropped from registry");
                    break;
                };
                match serde_json::to_string(&notification) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize notification");
                    }
                }
            }

            _ = ping_timer.tick() => {
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Read and discard client frames until the connection closes.
async fn drain_incoming(receiver: &mut SplitStream<WebSocket>) {
    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Close(_)) => {
                debug!("Received close frame");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!(message = %text.as_str(), "Ignoring client text frame");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}
