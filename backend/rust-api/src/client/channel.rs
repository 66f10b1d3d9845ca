//! Client side of the realtime protocol.
//!
//! One websocket multiplexes every room the caller subscribes to. The
//! channel is constructed explicitly and handed to whoever needs it; there is
//! no process-wide instance. Lost connections are re-established with
//! backoff and every active room is joined again with the identity it was
//! first joined with.

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::error::ClientError;
use crate::models::{ClientMessage, ParticipantIdentity, RoomId, ServerMessage};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Closed,
}

struct Membership {
    identity: Option<ParticipantIdentity>,
    subscribers: HashMap<u64, mpsc::Sender<ServerMessage>>,
}

struct Shared {
    rooms: Mutex<HashMap<RoomId, Membership>>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    state: watch::Sender<ConnectionState>,
    shutdown: Notify,
    next_subscription: AtomicU64,
}

impl Shared {
    fn new(outbound: mpsc::UnboundedSender<ClientMessage>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connected);
        Self {
            rooms: Mutex::new(HashMap::new()),
            outbound,
            state,
            shutdown: Notify::new(),
            next_subscription: AtomicU64::new(1),
        }
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<RoomId, Membership>> {
        self.rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, frame: ClientMessage) -> Result<(), ClientError> {
        self.outbound
            .send(frame)
            .map_err(|_| ClientError::Transport("realtime channel is closed".to_string()))
    }

    /// Delivers one server frame to the subscribers it is addressed to.
    fn route(&self, message: ServerMessage) {
        let rooms = self.rooms();
        let targets: Vec<&mpsc::Sender<ServerMessage>> = match message.room() {
            Some(room) => rooms
                .get(room)
                .map(|m| m.subscribers.values().collect())
                .unwrap_or_default(),
            None if matches!(message, ServerMessage::ErrorNotice { .. }) => rooms
                .values()
                .flat_map(|m| m.subscribers.values())
                .collect(),
            None => {
                tracing::trace!(event = message.event_name(), "Realtime frame without room");
                return;
            }
        };

        for subscriber in targets {
            if let Err(mpsc::error::TrySendError::Full(_)) = subscriber.try_send(message.clone()) {
                tracing::warn!(event = message.event_name(), "Realtime subscriber is full, dropping event");
            }
        }
    }

    fn unsubscribe(&self, room: &RoomId, id: u64) {
        let mut rooms = self.rooms();
        let Some(membership) = rooms.get_mut(room) else {
            return;
        };
        membership.subscribers.remove(&id);
        if membership.subscribers.is_empty() {
            rooms.remove(room);
            let _ = self.outbound.send(ClientMessage::Leave { room: room.clone() });
        }
    }

    /// Queues a `leave` for every active room, then ends all subscriptions.
    fn close(&self) {
        for (room, _) in self.rooms().drain() {
            let _ = self.outbound.send(ClientMessage::Leave { room });
        }
        self.state.send_replace(ConnectionState::Closed);
    }
}

/// Events for one room. Dropping it leaves the room once no other
/// subscription for that room remains.
pub struct RoomSubscription {
    id: u64,
    room: RoomId,
    events: mpsc::Receiver<ServerMessage>,
    shared: Arc<Shared>,
}

impl RoomSubscription {
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Next event for the room; `None` once the channel or the room is closed.
    pub async fn next(&mut self) -> Option<ServerMessage> {
        self.events.recv().await
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.shared.unsubscribe(&self.room, self.id);
    }
}

pub struct RealtimeChannel {
    shared: Arc<Shared>,
}

impl RealtimeChannel {
    /// Opens the socket. Later connection losses are handled in the background.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        Self::connect_with(url, RetryConfig::default(), RetryConfig::reconnect()).await
    }

    pub async fn connect_with(
        url: &str,
        initial: RetryConfig,
        reconnect: RetryConfig,
    ) -> Result<Self, ClientError> {
        let (socket, _) = retry_async_with_config(&initial, |_: &WsError| true, || connect_async(url))
            .await
            .map_err(|e| ClientError::Transport(format!("realtime connect to {} failed: {}", url, e)))?;
        tracing::debug!(url, "Realtime channel connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(outbound_tx));
        tokio::spawn(drive(
            shared.clone(),
            url.to_string(),
            socket,
            outbound_rx,
            reconnect,
        ));
        Ok(Self { shared })
    }

    /// Subscribes to `room`. Every call re-sends `join`, so the new subscriber
    /// receives the join-time snapshot.
    pub fn join_room(
        &self,
        room: RoomId,
        identity: Option<ParticipantIdentity>,
    ) -> Result<RoomSubscription, ClientError> {
        if self.state() == ConnectionState::Closed {
            return Err(ClientError::Transport("realtime channel is closed".to_string()));
        }
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, events) = mpsc::channel(SUBSCRIBER_BUFFER);
        {
            let mut rooms = self.shared.rooms();
            let membership = rooms.entry(room.clone()).or_insert_with(|| Membership {
                identity: None,
                subscribers: HashMap::new(),
            });
            if identity.is_some() {
                membership.identity = identity;
            }
            membership.subscribers.insert(id, tx);
            self.shared.send(ClientMessage::Join {
                room: room.clone(),
                identity: membership.identity.clone(),
            })?;
        }
        tracing::debug!(room = %room, subscription = id, "Joined realtime room");

        Ok(RoomSubscription {
            id,
            room,
            events,
            shared: self.shared.clone(),
        })
    }

    /// Leaves `room` for every subscriber; their streams end.
    pub fn leave_room(&self, room: &RoomId) -> Result<(), ClientError> {
        if self.shared.rooms().remove(room).is_some() {
            self.shared.send(ClientMessage::Leave { room: room.clone() })?;
        }
        Ok(())
    }

    pub fn ping(&self) -> Result<(), ClientError> {
        self.shared.send(ClientMessage::Ping)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn active_rooms(&self) -> Vec<RoomId> {
        self.shared.rooms().keys().cloned().collect()
    }

    /// Leaves every room, closes the socket and ends every subscription.
    pub fn dispose(&self) {
        self.shared.close();
        self.shared.shutdown.notify_one();
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

enum Exit {
    Disposed,
    Lost,
}

async fn drive(
    shared: Arc<Shared>,
    url: String,
    mut socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    reconnect: RetryConfig,
) {
    loop {
        match run_connection(&shared, &mut socket, &mut outbound).await {
            Exit::Disposed => {
                flush(&mut socket, &mut outbound).await;
                let _ = socket.close(None).await;
                break;
            }
            Exit::Lost => {
                if *shared.state.borrow() == ConnectionState::Closed {
                    break;
                }
                tracing::warn!(url = %url, "Realtime connection lost, reconnecting");
                shared.state.send_replace(ConnectionState::Reconnecting);
            }
        }

        let attempt = tokio::select! {
            result = retry_async_with_config(&reconnect, |_: &WsError| true, || connect_async(url.as_str())) => result,
            _ = shared.shutdown.notified() => break,
        };
        match attempt {
            Ok((next, _)) => {
                socket = next;
                shared.state.send_replace(ConnectionState::Connected);
                tracing::info!(url = %url, "Realtime connection restored");
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "Realtime reconnect gave up");
                shared.close();
                break;
            }
        }
    }
}

async fn run_connection(
    shared: &Shared,
    socket: &mut Socket,
    outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
) -> Exit {
    // queued frames belonged to the previous socket; active rooms are rejoined below
    while outbound.try_recv().is_ok() {}
    let rejoin: Vec<ClientMessage> = shared
        .rooms()
        .iter()
        .map(|(room, membership)| ClientMessage::Join {
            room: room.clone(),
            identity: membership.identity.clone(),
        })
        .collect();
    for frame in rejoin {
        if send_frame(socket, &frame).await.is_err() {
            return Exit::Lost;
        }
    }

    loop {
        tokio::select! {
            _ = shared.shutdown.notified() => return Exit::Disposed,
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return Exit::Disposed;
                };
                if send_frame(socket, &frame).await.is_err() {
                    return Exit::Lost;
                }
            }
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                    Ok(message) => shared.route(message),
                    Err(e) => tracing::warn!(error = %e, "Unrecognised realtime frame"),
                },
                Some(Ok(Message::Close(_))) | None => return Exit::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Realtime read failed");
                    return Exit::Lost;
                }
            },
        }
    }
}

/// Sends whatever is still queued, typically the `leave` frames from `dispose`.
async fn flush(socket: &mut Socket, outbound: &mut mpsc::UnboundedReceiver<ClientMessage>) {
    while let Ok(frame) = outbound.try_recv() {
        if let Err(e) = send_frame(socket, &frame).await {
            tracing::debug!(error = %e, "Realtime flush failed");
            return;
        }
    }
}

async fn send_frame(socket: &mut Socket, frame: &ClientMessage) -> Result<(), WsError> {
    let text = serde_json::to_string(frame).map_err(|e| WsError::Io(std::io::Error::other(e)))?;
    socket.send(Message::text(text)).await
}
