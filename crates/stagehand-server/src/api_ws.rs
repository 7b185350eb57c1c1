//! WebSocket endpoint feeding the hub.

use crate::connections::{Outbound, OUTBOUND_QUEUE};
use crate::hub::{ConnectionContext, HubError};
use crate::AppState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        ConnectInfo, Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;

/// Close-frame reasons are limited to 123 bytes on the wire.
const MAX_CLOSE_REASON: usize = 123;

/// Handler for `GET /ws`.
///
/// Any client may connect; role and secret are checked by the `hello`
/// handshake inside the socket.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    tracing::debug!(remote_addr = %addr, "websocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);

    let send_task = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let message = match item {
                Outbound::Text(text) => Message::Text(text.into()),
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut ctx = ConnectionContext::new(tx.clone());
    tracing::debug!(connection = %ctx.id(), remote_addr = %addr, "websocket opened");

    while let Some(Ok(msg)) = receiver.next().await {
        let result = match msg {
            Message::Text(text) => state.hub.handle_frame(&mut ctx, text.as_str()).await,
            Message::Binary(_) => Err(HubError::Protocol("binary frames are not supported".into())),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if let Err(e) = result {
            tracing::debug!(connection = %ctx.id(), error = %e, "frame rejected");
            ctx.send(&e.frame());
            if let Some(code) = e.close_code() {
                let _ = tx
                    .send(Outbound::Close {
                        code,
                        reason: close_reason(&e),
                    })
                    .await;
                break;
            }
        }
    }

    state.hub.disconnect(&ctx).await;
    drop(ctx);
    drop(tx);
    if let Err(e) = send_task.await {
        tracing::error!("websocket send task join error: {}", e);
    }
    tracing::debug!(remote_addr = %addr, "websocket closed");
}

fn close_reason(error: &HubError) -> String {
    let mut reason = error.to_string();
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_fits_in_a_frame() {
        let long = HubError::Protocol("é".repeat(200));
        let reason = close_reason(&long);
        assert!(reason.len() <= MAX_CLOSE_REASON);
        assert!(reason.starts_with("protocol error: "));

        assert_eq!(close_reason(&HubError::BadSecret), "invalid secret");
    }
}
