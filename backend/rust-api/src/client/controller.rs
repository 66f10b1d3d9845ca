use chrono::{FixedOffset, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::api::LiveQuizApi;
use super::error::ClientError;
use crate::models::live_quiz::{ScheduleRequest, WindowError};
use crate::models::{ControlAction, QuizStatus, RoomId, ScheduledWindow, ServerMessage, SessionSnapshot};
use crate::utils::time::parse_instant;

#[derive(Debug, Default)]
struct ControllerView {
    snapshot: Option<SessionSnapshot>,
    confirmed: Option<QuizStatus>,
    tentative: Option<QuizStatus>,
    ended: bool,
}

/// Admin-side control of one quiz.
///
/// A successful command records a tentative status. The next authoritative
/// `status` (or `ended`) event from the quiz room replaces it, whatever it says.
/// Each control allows one request in flight at a time.
pub struct SessionController {
    api: Arc<dyn LiveQuizApi>,
    quiz_id: String,
    room: RoomId,
    view: Mutex<ControllerView>,
    in_flight: Mutex<HashSet<ControlAction>>,
}

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<ControlAction>>,
    action: ControlAction,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.action);
        }
    }
}

impl SessionController {
    pub fn new(api: Arc<dyn LiveQuizApi>, quiz_id: impl Into<String>) -> Self {
        let quiz_id = quiz_id.into();
        Self {
            api,
            room: RoomId::quiz(&quiz_id),
            quiz_id,
            view: Mutex::new(ControllerView::default()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn quiz_id(&self) -> &str {
        &self.quiz_id
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Loads the server's current view, dropping any tentative status.
    pub async fn refresh(&self) -> Result<SessionSnapshot, ClientError> {
        let snapshot = self.api.get(&self.quiz_id).await?;
        let mut view = self.view();
        view.confirmed = Some(snapshot.status);
        view.tentative = None;
        view.ended = snapshot.status == QuizStatus::Completed;
        view.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Tentative status if one is pending, otherwise the last confirmed one.
    pub fn status(&self) -> Option<QuizStatus> {
        let view = self.view();
        view.tentative.or(view.confirmed)
    }

    pub fn is_live(&self) -> bool {
        self.status().is_some_and(QuizStatus::is_live)
    }

    pub fn is_tentative(&self) -> bool {
        self.view().tentative.is_some()
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.view().snapshot.clone()
    }

    pub fn is_in_flight(&self, action: ControlAction) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(&action))
            .unwrap_or(false)
    }

    pub async fn start(&self) -> Result<SessionSnapshot, ClientError> {
        let _guard = self.begin(ControlAction::Start)?;
        let snapshot = self.api.start(&self.quiz_id).await?;
        Ok(self.record_tentative(snapshot))
    }

    pub async fn end(&self) -> Result<SessionSnapshot, ClientError> {
        let _guard = self.begin(ControlAction::End)?;
        let snapshot = self.api.end(&self.quiz_id).await?;
        Ok(self.record_tentative(snapshot))
    }

    pub async fn cancel_schedule(&self) -> Result<SessionSnapshot, ClientError> {
        let _guard = self.begin(ControlAction::CancelSchedule)?;
        let snapshot = self.api.cancel_schedule(&self.quiz_id).await?;
        Ok(self.record_tentative(snapshot))
    }

    /// Schedules from wall-clock readings in `offset` (or RFC 3339 instants).
    /// Parsing and window checks happen before any request is sent.
    pub async fn schedule_local(
        &self,
        start: &str,
        end: &str,
        offset: FixedOffset,
    ) -> Result<SessionSnapshot, ClientError> {
        let start_at = parse_instant(start, offset)?;
        let end_at = parse_instant(end, offset)?;
        self.schedule(ScheduledWindow::new(start_at, end_at)?).await
    }

    pub async fn schedule(&self, window: ScheduledWindow) -> Result<SessionSnapshot, ClientError> {
        if window.end_at <= Utc::now() {
            return Err(WindowError::EndInPast.into());
        }
        let _guard = self.begin(ControlAction::Schedule)?;
        let request = ScheduleRequest {
            live_start_at: window.start_at,
            live_end_at: window.end_at,
        };
        let snapshot = self.api.schedule(&self.quiz_id, &request).await?;
        Ok(self.record_tentative(snapshot))
    }

    /// Feeds one event from the quiz room. Returns whether the view changed.
    pub fn apply_event(&self, message: &ServerMessage) -> bool {
        if message.room() != Some(&self.room) {
            return false;
        }
        let mut view = self.view();
        if view.ended {
            return false;
        }
        match message {
            ServerMessage::Joined { session, .. } => {
                view.confirmed = Some(session.status);
                view.tentative = None;
                view.ended = session.status == QuizStatus::Completed;
                view.snapshot = Some(session.clone());
                true
            }
            ServerMessage::Status { status, .. } => {
                view.confirmed = Some(*status);
                view.tentative = None;
                true
            }
            ServerMessage::Ended { .. } => {
                view.confirmed = Some(QuizStatus::Completed);
                view.tentative = None;
                view.ended = true;
                true
            }
            _ => false,
        }
    }

    /// Claims the control and checks the precondition against the local view.
    fn begin(&self, action: ControlAction) -> Result<InFlightGuard<'_>, ClientError> {
        {
            let mut set = self
                .in_flight
                .lock()
                .map_err(|_| ClientError::InFlight(action))?;
            if !set.insert(action) {
                return Err(ClientError::InFlight(action));
            }
        }
        let guard = InFlightGuard {
            set: &self.in_flight,
            action,
        };

        if let Some(status) = self.status() {
            if !action.allowed_from(status) {
                return Err(ClientError::CommandRejected(format!(
                    "cannot {} a quiz that is {}",
                    action, status
                )));
            }
        }
        Ok(guard)
    }

    fn record_tentative(&self, snapshot: SessionSnapshot) -> SessionSnapshot {
        let mut view = self.view();
        if !view.ended {
            view.tentative = Some(snapshot.status);
            view.snapshot = Some(snapshot.clone());
        }
        snapshot
    }

    fn view(&self) -> MutexGuard<'_, ControllerView> {
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
