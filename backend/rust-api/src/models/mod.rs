pub mod answer;
pub mod live_quiz;
pub mod participant;
pub mod realtime;
pub mod timer;

pub use live_quiz::{ControlAction, QuizSession, QuizStatus, ScheduledWindow, SessionSnapshot};
pub use participant::{Participant, ParticipantIdentity, ParticipantKind};
pub use realtime::{ClientMessage, EndReason, RoomId, ServerMessage};
pub use timer::TimerSnapshot;
