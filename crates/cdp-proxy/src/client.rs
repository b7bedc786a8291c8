//! Client-facing WebSocket sessions.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use event_journal::{EntryKind, JournalEntry};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::daemon::ProxyInner;

pub(crate) async fn upgrade_handler(
    State(inner): State<Arc<ProxyInner>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        serve_client(inner, socket).await;
    })
}

/// Every request runs on its own task; replies are funnelled through one writer so a slow
/// upstream never holds up other requests on the same session.
async fn serve_client(inner: Arc<ProxyInner>, socket: WebSocket) {
    let client_id = Uuid::new_v4().to_string();
    inner.record(
        JournalEntry::new(EntryKind::Proxy)
            .field("message", "client connected")
            .field("clientId", client_id.as_str()),
    );
    debug!(target: "cdp-proxy", %client_id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let stop = inner.listener_stop();
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let inner = Arc::clone(&inner);
                    let tx = tx.clone();
                    let client_id = client_id.clone();
                    tokio::spawn(async move {
                        let reply = inner.handle_client_frame(&client_id, &text).await;
                        let _ = tx.send(reply.to_string());
                    });
                }
                Some(Ok(Message::Binary(_))) => {
                    let reply = json!({ "error": { "message": "bad request: binary frames are not supported" } });
                    let _ = tx.send(reply.to_string());
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(target: "cdp-proxy", %client_id, ?frame, "client closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(target: "cdp-proxy", %client_id, %err, "client socket error");
                    break;
                }
                None => break,
            },
        }
    }

    // In-flight requests still hold senders; the writer drains them and exits.
    drop(tx);
    if stop.is_cancelled() {
        writer.abort();
    }
    inner.record(
        JournalEntry::new(EntryKind::Proxy)
            .field("message", "client disconnected")
            .field("clientId", client_id.as_str()),
    );
}
