use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use validator::Validate;

use super::realtime::EndReason;
use super::timer::TimerSnapshot;

/// Lifecycle of a live quiz. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    Draft,
    Scheduled,
    Live,
    Completed,
}

impl QuizStatus {
    pub fn is_live(self) -> bool {
        matches!(self, QuizStatus::Live)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuizStatus::Draft => "draft",
            QuizStatus::Scheduled => "scheduled",
            QuizStatus::Live => "live",
            QuizStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for QuizStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin commands that drive a session through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    End,
    Schedule,
    CancelSchedule,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::End => "end",
            ControlAction::Schedule => "schedule",
            ControlAction::CancelSchedule => "cancel-schedule",
        }
    }

    /// Whether the command may be issued against a session in `status`.
    pub fn allowed_from(self, status: QuizStatus) -> bool {
        match self {
            ControlAction::Start => matches!(status, QuizStatus::Draft | QuizStatus::Scheduled),
            ControlAction::End => status == QuizStatus::Live,
            ControlAction::Schedule => status == QuizStatus::Draft,
            ControlAction::CancelSchedule => status == QuizStatus::Scheduled,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {action} a quiz that is {status}")]
    Rejected {
        action: ControlAction,
        status: QuizStatus,
    },

    #[error(transparent)]
    Window(#[from] WindowError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("live window must end after it starts")]
    EndNotAfterStart,

    #[error("live window must end in the future")]
    EndInPast,
}

/// Absolute live window. Both ends are UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledWindow {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl ScheduledWindow {
    pub fn new(start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Result<Self, WindowError> {
        if start_at >= end_at {
            return Err(WindowError::EndNotAfterStart);
        }
        Ok(Self { start_at, end_at })
    }
}

/// One run of a quiz, from creation to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSession {
    pub quiz_id: String,
    pub title: String,
    pub department_id: Option<String>,
    status: QuizStatus,
    time_limit_seconds: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    scheduled_window: Option<ScheduledWindow>,
    closes_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    end_reason: Option<EndReason>,
    pub created_at: DateTime<Utc>,
}

impl QuizSession {
    pub fn new(
        quiz_id: impl Into<String>,
        title: impl Into<String>,
        department_id: Option<String>,
        time_limit_seconds: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            quiz_id: quiz_id.into(),
            title: title.into(),
            department_id,
            status: QuizStatus::Draft,
            // non-positive limits mean the quiz is untimed
            time_limit_seconds: time_limit_seconds
                .filter(|limit| *limit > 0)
                .map(|limit| limit.min(u32::MAX as i64) as u32),
            started_at: None,
            scheduled_window: None,
            closes_at: None,
            ended_at: None,
            end_reason: None,
            created_at: now,
        }
    }

    pub fn status(&self) -> QuizStatus {
        self.status
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn time_limit_seconds(&self) -> Option<u32> {
        self.time_limit_seconds
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn scheduled_window(&self) -> Option<ScheduledWindow> {
        self.scheduled_window
    }

    pub fn closes_at(&self) -> Option<DateTime<Utc>> {
        self.closes_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    fn ensure_allowed(&self, action: ControlAction) -> Result<(), TransitionError> {
        if action.allowed_from(self.status) {
            Ok(())
        } else {
            Err(TransitionError::Rejected {
                action,
                status: self.status,
            })
        }
    }

    /// Explicit start. A pending window is discarded: the admin took manual control.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_allowed(ControlAction::Start)?;
        self.scheduled_window = None;
        self.closes_at = None;
        self.go_live(now);
        Ok(())
    }

    pub fn end(&mut self, now: DateTime<Utc>, reason: EndReason) -> Result<(), TransitionError> {
        self.ensure_allowed(ControlAction::End)?;
        self.status = QuizStatus::Completed;
        self.ended_at = Some(now);
        self.end_reason = Some(reason);
        Ok(())
    }

    pub fn schedule(
        &mut self,
        window: ScheduledWindow,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_allowed(ControlAction::Schedule)?;
        if window.end_at <= now {
            return Err(WindowError::EndInPast.into());
        }
        self.status = QuizStatus::Scheduled;
        self.scheduled_window = Some(window);
        Ok(())
    }

    pub fn cancel_schedule(&mut self) -> Result<(), TransitionError> {
        self.ensure_allowed(ControlAction::CancelSchedule)?;
        self.status = QuizStatus::Draft;
        self.scheduled_window = None;
        Ok(())
    }

    fn go_live(&mut self, now: DateTime<Utc>) {
        self.status = QuizStatus::Live;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    /// Remaining whole seconds for a live, timed session.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<u32> {
        let total = self.time_limit_seconds?;
        let started_at = self.started_at?;
        if !self.is_live() {
            return None;
        }
        Some(remaining_from_start(total, started_at, now))
    }

    pub fn timer_snapshot(&self, now: DateTime<Utc>) -> Option<TimerSnapshot> {
        let remaining = self.remaining_seconds(now)?;
        let total = self.time_limit_seconds?;
        Some(TimerSnapshot::new(remaining, total, now))
    }

    /// Applies the transition due at `now`, if any.
    ///
    /// A scheduled session opens once `start_at` is reached. A live session
    /// closes when its window's `end_at` passes or its timer reaches zero.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Option<ScheduledTransition> {
        match self.status {
            QuizStatus::Scheduled => {
                let window = self.scheduled_window?;
                if now >= window.end_at {
                    // window fully missed; it opens and closes in one step
                    self.scheduled_window = None;
                    self.go_live(window.start_at);
                    self.status = QuizStatus::Completed;
                    self.ended_at = Some(now);
                    self.end_reason = Some(EndReason::WindowClosed);
                    return Some(ScheduledTransition::Ended(EndReason::WindowClosed));
                }
                if now >= window.start_at {
                    self.scheduled_window = None;
                    self.closes_at = Some(window.end_at);
                    self.go_live(now);
                    return Some(ScheduledTransition::WentLive);
                }
                None
            }
            QuizStatus::Live => {
                let reason = if self.remaining_seconds(now) == Some(0) {
                    EndReason::TimeUp
                } else if self.closes_at.is_some_and(|closes_at| now >= closes_at) {
                    EndReason::WindowClosed
                } else {
                    return None;
                };
                self.status = QuizStatus::Completed;
                self.ended_at = Some(now);
                self.end_reason = Some(reason);
                Some(ScheduledTransition::Ended(reason))
            }
            QuizStatus::Draft | QuizStatus::Completed => None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let window = match self.status {
            QuizStatus::Scheduled => self.scheduled_window,
            _ => None,
        };
        SessionSnapshot {
            quiz_id: self.quiz_id.clone(),
            title: self.title.clone(),
            department_id: self.department_id.clone(),
            status: self.status,
            is_live: self.is_live(),
            time_limit: self.time_limit_seconds,
            started_at: self.started_at,
            live_start_at: window.map(|w| w.start_at),
            live_end_at: window.map(|w| w.end_at).or(self.closes_at),
            ended_at: self.ended_at,
            end_reason: self.end_reason,
        }
    }
}

pub fn remaining_from_start(total: u32, started_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let elapsed = (now - started_at).max(Duration::zero()).num_seconds();
    (total as i64 - elapsed).clamp(0, total as i64) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledTransition {
    WentLive,
    Ended(EndReason),
}

/// Boundary view of a session. `is_live` is derived from `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub quiz_id: String,
    pub title: String,
    pub department_id: Option<String>,
    pub status: QuizStatus,
    pub is_live: bool,
    pub time_limit: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub live_start_at: Option<DateTime<Utc>>,
    pub live_end_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLiveQuizRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,
    pub department_id: Option<String>,
    pub time_limit: Option<i64>,
}

/// Schedule body. Instants must carry an offset; naive local times are rejected by serde.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub live_start_at: DateTime<Utc>,
    pub live_end_at: DateTime<Utc>,
}

impl ScheduleRequest {
    pub fn window(&self) -> Result<ScheduledWindow, WindowError> {
        ScheduledWindow::new(self.live_start_at, self.live_end_at)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListLiveQuizzesQuery {
    pub department_id: Option<String>,
}
