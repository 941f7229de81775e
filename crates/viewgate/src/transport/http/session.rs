//! One WebSocket connection's lifetime in a product queue.
//!
//! Connect → admission → `init`, then a single loop that both drains the
//! connection's outbound channel onto the socket and handles inbound control
//! frames. Any exit from the loop (close, error, shutdown) disconnects the
//! client from the queue.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::protocol::{ClientId, ClientMessage, ServerMessage};
use crate::service::{ProductId, QueueService};

pub(super) async fn handle_socket(
    socket: WebSocket,
    service: Arc<QueueService>,
    product: ProductId,
    client_id: ClientId,
) {
    let (sink, stream) = socket.split();
    run_session(sink, stream, service, product, client_id).await;
}

/// Serialize `message` and write it as a text frame. Returns `false` once the
/// socket is gone.
async fn send_json<Si, T>(sink: &mut Si, message: &T) -> bool
where
    Si: Sink<Message> + Unpin,
    T: Serialize,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server message");
            return true;
        }
    };
    sink.send(Message::Text(text.into())).await.is_ok()
}

pub(super) async fn run_session<Si, St, E>(
    mut sink: Si,
    mut stream: St,
    service: Arc<QueueService>,
    product: ProductId,
    client_id: ClientId,
) where
    Si: Sink<Message> + Unpin,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let shutdown = service.shutdown_token();
    let (channel, mut outbound) = service.open_channel();
    let channel_id = channel.id();
    // Keeps `outbound` open after the queue entry (and its handle) is gone,
    // e.g. after an explicit leave.
    let _local = channel.clone();

    let admission = service.enter(product, client_id.clone(), channel);
    debug!(
        product,
        client_id = %client_id,
        channel = %channel_id,
        granted = admission.granted,
        position = admission.position,
        "Session started"
    );

    let mut open = send_json(&mut sink, &ServerMessage::<ProductId>::from(&admission)).await;

    while open {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            outgoing = outbound.recv() => match outgoing {
                Some(message) => open = send_json(&mut sink, &message).await,
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match ClientMessage::parse(text.as_str()) {
                    Ok(ClientMessage::Heartbeat) => {
                        open = send_json(&mut sink, &ServerMessage::<ProductId>::heartbeat_ok()).await;
                    }
                    Ok(ClientMessage::Leave) => {
                        let promoted = service.leave(product, &client_id);
                        info!(
                            product,
                            client_id = %client_id,
                            promoted = ?promoted.as_ref().map(ClientId::as_str),
                            "Client left"
                        );
                        open = send_json(&mut sink, &ServerMessage::<ProductId>::left()).await;
                    }
                    Err(e) => debug!(client_id = %client_id, error = %e, "Ignoring client frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client_id = %client_id, error = %e, "WebSocket receive failed");
                    break;
                }
            },
        }
    }

    let promoted = service.disconnect(product, &client_id, channel_id);
    info!(
        product,
        client_id = %client_id,
        promoted = ?promoted.as_ref().map(ClientId::as_str),
        "Session closed"
    );
}
