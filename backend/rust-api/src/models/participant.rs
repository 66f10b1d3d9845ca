use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    Registered,
    Guest,
}

/// One roster entry. Identity is `participant_id`; display names are not identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub participant_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub kind: ParticipantKind,
}

/// Identity a connection presents when joining a quiz room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantIdentity {
    #[validate(length(min = 1, max = 128, message = "participantId must not be empty"))]
    pub participant_id: String,
    #[validate(length(min = 1, max = 100, message = "displayName must not be empty"))]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub kind: ParticipantKind,
}

impl ParticipantIdentity {
    pub fn registered(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
            kind: ParticipantKind::Registered,
        }
    }

    pub fn guest(guest_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: guest_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
            kind: ParticipantKind::Guest,
        }
    }

    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

impl From<ParticipantIdentity> for Participant {
    fn from(identity: ParticipantIdentity) -> Self {
        Participant {
            participant_id: identity.participant_id,
            display_name: identity.display_name,
            avatar_url: identity.avatar_url,
            kind: identity.kind,
        }
    }
}
