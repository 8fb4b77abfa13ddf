use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    models::{ClientFrame, ServerFrame},
    relay::{ConnId, RelayHub, Subscription},
};

type Sink = SplitSink<WebSocket, Message>;

pub fn router() -> Router {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, Extension(hub): Extension<RelayHub>) -> impl IntoResponse {
    ws.on_upgrade(move |sock| user_ws(sock, hub))
}

/* ---------------- per connection ---------------- */
async fn user_ws(sock: WebSocket, hub: RelayHub) {
    let conn_id = Uuid::new_v4();
    let (mut sink, mut stream) = sock.split();
    let mut sub: Option<Subscription> = None;
    debug!(conn_id = %conn_id, "relay connection opened");

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(raw))) => {
                    on_text(&hub, conn_id, &raw, &mut sub, &mut sink).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn_id = %conn_id, error = %e, "relay socket error");
                    break;
                }
            },
            outbound = next_frame(&mut sub) => match outbound {
                Some(payload) => {
                    if sink.send(Message::Text(payload.to_string())).await.is_err() {
                        break;
                    }
                }
                None => sub = None,
            },
        }
    }

    /* closed: deregister */
    if let Some(s) = sub {
        hub.leave(s.room_id(), conn_id).await;
    }
    debug!(conn_id = %conn_id, "relay connection closed");
}

async fn next_frame(sub: &mut Option<Subscription>) -> Option<Arc<str>> {
    match sub {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

async fn on_text(
    hub: &RelayHub,
    conn_id: ConnId,
    raw: &str,
    sub: &mut Option<Subscription>,
    sink: &mut Sink,
) {
    let frame = match ClientFrame::parse(raw) {
        Ok(f) => f,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "dropping malformed relay frame");
            return;
        }
    };

    match frame {
        ClientFrame::Join { room_id, identity } => {
            // one room per connection
            if let Some(old) = sub.take() {
                hub.leave(old.room_id(), conn_id).await;
            }
            let reply = match hub.join(&room_id, conn_id, &identity).await {
                Ok(s) => {
                    let joined = ServerFrame::Joined {
                        room_id: s.room_id().to_string(),
                        identity: s.identity().to_string(),
                    };
                    *sub = Some(s);
                    joined
                }
                Err(e) => {
                    info!(conn_id = %conn_id, room_id = %room_id, error = %e, "relay join refused");
                    ServerFrame::Error { message: e.to_string() }
                }
            };
            send_frame(sink, &reply).await;
        }
        ClientFrame::Publish { room_id, event } => match sub {
            Some(s) if s.room_id() == room_id => {
                // append failures are logged by the hub; nothing to tell the sender
                let _ = hub.publish(&room_id, conn_id, event).await;
            }
            _ => warn!(conn_id = %conn_id, room_id = %room_id, "dropping event for a room this connection has not joined"),
        },
    }
}

async fn send_frame(sink: &mut Sink, frame: &ServerFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            if let Err(e) = sink.send(Message::Text(json)).await {
                debug!(error = %e, "could not send server frame");
            }
        }
        Err(e) => warn!(error = %e, "could not encode server frame"),
    }
}
