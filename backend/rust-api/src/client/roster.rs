use crate::models::{Participant, RoomId, ServerMessage};

/// Local copy of one room's roster.
///
/// Every `roster` event is a full snapshot, so it replaces the list outright.
/// Entries that share a display name stay distinct; only `participantId`
/// identifies a participant.
#[derive(Debug, Clone)]
pub struct RosterReconciler {
    room: RoomId,
    participants: Vec<Participant>,
    ended: bool,
}

impl RosterReconciler {
    pub fn new(room: RoomId) -> Self {
        Self {
            room,
            participants: Vec::new(),
            ended: false,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.participants
            .iter()
            .any(|p| p.participant_id == participant_id)
    }

    /// Returns true when the event changed the list.
    pub fn apply(&mut self, message: &ServerMessage) -> bool {
        if self.ended || message.room() != Some(&self.room) {
            return false;
        }
        match message {
            ServerMessage::Roster { participants, .. } => {
                if self.participants == *participants {
                    return false;
                }
                self.participants = participants.clone();
                true
            }
            ServerMessage::Ended { .. } => {
                self.ended = true;
                false
            }
            _ => false,
        }
    }
}
