//! Per-room event relay.
//!
//! Each room with at least one live connection gets a `broadcast` channel.
//! A publish serializes the event once, pushes it into the channel and then
//! appends it to the room's log. `broadcast::Sender::send` never waits on
//! receivers, so a slow socket only falls behind (and skips frames once it
//! lags past the channel capacity) without holding up anyone else.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{bad, not_found, AppResult};
use crate::models::{RoomEvent, ServerFrame};
use crate::store::RoomStore;

pub type ConnId = Uuid;

/// Whether a connection receives the events it published itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoPolicy {
    ExcludeSender,
    IncludeSender,
}

impl EchoPolicy {
    pub fn from_flag(echo_to_sender: bool) -> Self {
        if echo_to_sender {
            EchoPolicy::IncludeSender
        } else {
            EchoPolicy::ExcludeSender
        }
    }
}

/// One frame on a room channel.
#[derive(Debug)]
pub struct Relayed {
    pub origin: ConnId,
    /// Deliver to `origin` as well.
    pub echo: bool,
    pub payload: Arc<str>,
}

pub type Tx = broadcast::Sender<Arc<Relayed>>;

struct RoomChannel {
    tx: Tx,
    /// conn id -> identity
    members: HashMap<ConnId, String>,
}

type RoomMap = Arc<RwLock<HashMap<String, RoomChannel>>>;

#[derive(Clone)]
pub struct RelayHub {
    rooms: RoomMap,
    store: RoomStore,
    policy: EchoPolicy,
    channel_capacity: usize,
}

/// A connection's view of its room channel.
pub struct Subscription {
    conn_id: ConnId,
    room_id: String,
    identity: String,
    rx: broadcast::Receiver<Arc<Relayed>>,
}

impl Subscription {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Next frame meant for this connection. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => {
                    if frame.origin == self.conn_id && !frame.echo {
                        continue;
                    }
                    return Some(frame.payload.clone());
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(conn_id = %self.conn_id, room_id = %self.room_id, skipped, "relay receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl RelayHub {
    pub fn new(store: RoomStore, policy: EchoPolicy, channel_capacity: usize) -> Self {
        Self {
            rooms: RoomMap::default(),
            store,
            policy,
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn policy(&self) -> EchoPolicy {
        self.policy
    }

    /// Register `conn_id` in `room_id`. The room has to exist.
    pub async fn join(&self, room_id: &str, conn_id: ConnId, identity: &str) -> AppResult<Subscription> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(bad("identity is required"));
        }
        if self.store.room_header(room_id).await?.is_none() {
            return Err(not_found("class not found"));
        }

        let rx = {
            let mut rooms = self.rooms.write().await;
            let channel = rooms.entry(room_id.to_string()).or_insert_with(|| RoomChannel {
                tx: broadcast::channel(self.channel_capacity).0,
                members: HashMap::new(),
            });
            channel.members.insert(conn_id, identity.to_string());
            let rx = channel.tx.subscribe();
            notify(channel, conn_id, &ServerFrame::PeerJoined { identity: identity.to_string() });
            rx
        };

        info!(room_id = %room_id, conn_id = %conn_id, identity = %identity, "relay connection joined");
        Ok(Subscription {
            conn_id,
            room_id: room_id.to_string(),
            identity: identity.to_string(),
            rx,
        })
    }

    /// Deregister `conn_id`. Reclaims the room entry when it was the last one.
    pub async fn leave(&self, room_id: &str, conn_id: ConnId) {
        let mut rooms = self.rooms.write().await;
        let Some(channel) = rooms.get_mut(room_id) else {
            return;
        };
        if let Some(identity) = channel.members.remove(&conn_id) {
            notify(channel, conn_id, &ServerFrame::PeerLeft { identity });
            info!(room_id = %room_id, conn_id = %conn_id, "relay connection left");
        }
        if channel.members.is_empty() {
            rooms.remove(room_id);
            debug!(room_id = %room_id, "room channel reclaimed");
        }
    }

    /// Broadcast `event` to the room, then append it to the room's log.
    ///
    /// Returns the number of connections the event was handed to. An append
    /// failure is logged and returned; the broadcast has already gone out.
    pub async fn publish(&self, room_id: &str, origin: ConnId, mut event: RoomEvent) -> AppResult<usize> {
        let echo = self.policy == EchoPolicy::IncludeSender;

        let recipients = {
            let rooms = self.rooms.read().await;
            match rooms.get(room_id) {
                Some(channel) => {
                    if let (RoomEvent::Chat(chat), Some(identity)) =
                        (&mut event, channel.members.get(&origin))
                    {
                        chat.identity = identity.clone();
                    }
                    let payload: Arc<str> = serde_json::to_string(&event)?.into();
                    let _ = channel.tx.send(Arc::new(Relayed { origin, echo, payload }));

                    let own = usize::from(!echo && channel.members.contains_key(&origin));
                    channel.members.len() - own
                }
                None => 0,
            }
        };

        if let Err(e) = self.store.append_event(room_id, &event).await {
            error!(room_id = %room_id, conn_id = %origin, error = %e, "event log append failed, event not durable");
            return Err(e);
        }
        debug!(room_id = %room_id, conn_id = %origin, recipients, "event relayed");
        Ok(recipients)
    }

    /// Live connections registered in `room_id`.
    pub async fn connection_count(&self, room_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map_or(0, |c| c.members.len())
    }

    /// Rooms that currently have a channel.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

/// Server notice to everyone in the room except `origin`.
fn notify(channel: &RoomChannel, origin: ConnId, frame: &ServerFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            let _ = channel.tx.send(Arc::new(Relayed { origin, echo: false, payload: json.into() }));
        }
        Err(e) => warn!(error = %e, "could not encode server frame"),
    }
}
