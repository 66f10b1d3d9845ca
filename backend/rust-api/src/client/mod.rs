//! Client library for the live quiz server: admin control, realtime rooms,
//! and the participant view.

pub mod api;
pub mod channel;
pub mod controller;
pub mod error;
pub mod guest;
pub mod listing;
pub mod participant;
pub mod roster;
pub mod timer;

pub use api::{HttpLiveQuizApi, LiveQuizApi};
pub use channel::{ConnectionState, RealtimeChannel, RoomSubscription};
pub use controller::SessionController;
pub use error::ClientError;
pub use guest::{FileGuestStore, GuestFlow, GuestIdentity, GuestIntake, MemoryGuestStore};
pub use listing::DepartmentFeed;
pub use participant::{LiveRoomView, ParticipantSession, Phase, SubmitAs};
pub use roster::RosterReconciler;
pub use timer::{spawn_countdown, TimerSynchronizer};
