use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::metrics::{ROOM_BROADCASTS_TOTAL, ROSTER_PRUNED_TOTAL};
use crate::models::{EndReason, Participant, ParticipantIdentity, ParticipantKind, RoomId, ServerMessage};

/// Identifies one realtime socket.
pub type ConnId = Uuid;

#[derive(Debug)]
struct RosterEntry {
    participant: Participant,
    connections: HashSet<ConnId>,
    joined_seq: u64,
    disconnected_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Room {
    sender: broadcast::Sender<ServerMessage>,
    roster: HashMap<String, RosterEntry>,
    observers: HashSet<ConnId>,
    ended: Option<EndReason>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            roster: HashMap::new(),
            observers: HashSet::new(),
            ended: None,
        }
    }

    fn snapshot(&self) -> Vec<Participant> {
        let mut entries: Vec<&RosterEntry> = self.roster.values().collect();
        entries.sort_by_key(|entry| entry.joined_seq);
        entries.into_iter().map(|entry| entry.participant.clone()).collect()
    }

    fn is_idle(&self) -> bool {
        self.ended.is_none() && self.roster.is_empty() && self.observers.is_empty()
    }

    /// Removes `conn` from the room. Returns true when the visible roster changed.
    fn detach(&mut self, conn: ConnId) -> bool {
        self.observers.remove(&conn);
        let before = self.roster.len();
        self.roster.retain(|_, entry| {
            entry.connections.remove(&conn);
            !entry.connections.is_empty() || entry.disconnected_at.is_some()
        });
        before != self.roster.len()
    }

    fn send(&self, room: &RoomId, message: ServerMessage) -> usize {
        if self.ended.is_some() {
            tracing::debug!(room = %room, event = message.event_name(), "Dropping event for ended room");
            return 0;
        }
        ROOM_BROADCASTS_TOTAL
            .with_label_values(&[message.event_name()])
            .inc();
        // no subscribers is not an error
        self.sender.send(message).unwrap_or(0)
    }
}

/// Result of a join: the roster right after the join and a receiver for later broadcasts.
pub struct JoinTicket {
    pub receiver: broadcast::Receiver<ServerMessage>,
    pub roster: Vec<Participant>,
    pub ended: Option<EndReason>,
}

/// Room membership and per-room fan-out.
///
/// The roster holds at most one entry per participant id. A participant
/// connected from several sockets stays listed until the last one leaves.
/// Sockets that drop without leaving keep their entry for a grace period so a
/// reconnect updates it instead of adding a new one.
pub struct RoomHub {
    rooms: RwLock<HashMap<RoomId, Room>>,
    capacity: usize,
    join_seq: AtomicU64,
}

impl RoomHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            join_seq: AtomicU64::new(0),
        }
    }

    pub async fn join(
        &self,
        conn: ConnId,
        room_id: &RoomId,
        identity: Option<ParticipantIdentity>,
    ) -> JoinTicket {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(self.capacity));

        let roster_changed = match identity {
            Some(identity) => {
                let participant_id = identity.participant_id.clone();
                match room.roster.get_mut(&participant_id) {
                    Some(entry) => {
                        let updated = Participant::from(identity);
                        let changed = entry.participant != updated;
                        entry.participant = updated;
                        entry.connections.insert(conn);
                        entry.disconnected_at = None;
                        tracing::debug!(room = %room_id, participant_id = %participant_id, "Participant rejoined");
                        changed
                    }
                    None => {
                        let seq = self.join_seq.fetch_add(1, Ordering::Relaxed);
                        room.roster.insert(
                            participant_id.clone(),
                            RosterEntry {
                                participant: identity.into(),
                                connections: HashSet::from([conn]),
                                joined_seq: seq,
                                disconnected_at: None,
                            },
                        );
                        tracing::info!(room = %room_id, participant_id = %participant_id, "Participant joined");
                        true
                    }
                }
            }
            None => {
                room.observers.insert(conn);
                false
            }
        };

        let roster = room.snapshot();
        if roster_changed {
            room.send(
                room_id,
                ServerMessage::Roster {
                    room: room_id.clone(),
                    participants: roster.clone(),
                },
            );
        }

        JoinTicket {
            receiver: room.sender.subscribe(),
            roster,
            ended: room.ended,
        }
    }

    /// Explicit leave of one connection.
    pub async fn leave(&self, conn: ConnId, room_id: &RoomId) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };

        // an explicit leave does not wait for the grace period
        for entry in room.roster.values_mut() {
            if entry.connections.contains(&conn) {
                entry.disconnected_at = None;
            }
        }
        if room.detach(conn) {
            tracing::info!(room = %room_id, conn = %conn, "Participant left");
            let participants = room.snapshot();
            room.send(
                room_id,
                ServerMessage::Roster {
                    room: room_id.clone(),
                    participants,
                },
            );
        }

        if room.is_idle() {
            rooms.remove(room_id);
        }
    }

    /// Socket closed without leaving. Entries left with no connection start
    /// their grace period.
    pub async fn disconnect(&self, conn: ConnId, now: DateTime<Utc>) {
        let mut rooms = self.rooms.write().await;
        for room in rooms.values_mut() {
            room.observers.remove(&conn);
            for entry in room.roster.values_mut() {
                if entry.connections.remove(&conn) && entry.connections.is_empty() {
                    entry.disconnected_at = Some(now);
                }
            }
        }
        rooms.retain(|_, room| !room.is_idle());
    }

    /// Drops entries whose grace period expired and broadcasts the new rosters.
    pub async fn prune_disconnected(&self, now: DateTime<Utc>, grace: Duration) -> usize {
        let mut rooms = self.rooms.write().await;
        let mut pruned = 0;

        for (room_id, room) in rooms.iter_mut() {
            let before = room.roster.len();
            room.roster.retain(|participant_id, entry| {
                let expired = entry
                    .disconnected_at
                    .is_some_and(|since| since + grace <= now);
                if expired {
                    let kind = match entry.participant.kind {
                        ParticipantKind::Registered => "registered",
                        ParticipantKind::Guest => "guest",
                    };
                    ROSTER_PRUNED_TOTAL.with_label_values(&[kind]).inc();
                    tracing::info!(room = %room_id, participant_id = %participant_id, "Pruned disconnected participant");
                }
                !expired
            });

            if room.roster.len() != before {
                pruned += before - room.roster.len();
                let participants = room.snapshot();
                room.send(
                    room_id,
                    ServerMessage::Roster {
                        room: room_id.clone(),
                        participants,
                    },
                );
            }
        }

        rooms.retain(|_, room| !room.is_idle());
        pruned
    }

    /// Fans `message` out to every subscriber. Ended rooms accept nothing further.
    pub async fn broadcast(&self, room_id: &RoomId, message: ServerMessage) -> usize {
        let rooms = self.rooms.read().await;
        match rooms.get(room_id) {
            Some(room) => room.send(room_id, message),
            None => 0,
        }
    }

    /// Marks the room ended and sends the terminal `ended` event.
    pub async fn end_room(&self, room_id: &RoomId, reason: EndReason) {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(self.capacity));
        if room.ended.is_some() {
            return;
        }

        ROOM_BROADCASTS_TOTAL.with_label_values(&["ended"]).inc();
        let _ = room.sender.send(ServerMessage::Ended {
            room: room_id.clone(),
            reason,
        });
        room.ended = Some(reason);
        tracing::info!(room = %room_id, reason = reason.as_str(), "Room ended");
    }

    pub async fn roster(&self, room_id: &RoomId) -> Vec<Participant> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(Room::snapshot)
            .unwrap_or_default()
    }

    pub async fn ended(&self, room_id: &RoomId) -> Option<EndReason> {
        self.rooms.read().await.get(room_id).and_then(|room| room.ended)
    }
}
