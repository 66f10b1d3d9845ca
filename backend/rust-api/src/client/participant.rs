use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::api::LiveQuizApi;
use super::channel::RoomSubscription;
use super::error::ClientError;
use super::guest::GuestIdentity;
use super::roster::RosterReconciler;
use super::timer::{spawn_countdown, Countdown, TimerSynchronizer};
use crate::models::answer::{AnswerItem, SubmitAnswersRequest, SubmitAnswersResponse, SubmitGuestAnswersRequest};
use crate::models::{EndReason, ParticipantIdentity, QuizStatus, RoomId, ServerMessage, SessionSnapshot};
use crate::utils::retry::RetryConfig;

pub const DEFAULT_REDIRECT_AFTER: Duration = Duration::from_secs(3);

/// Everything a participant sees of one quiz room.
#[derive(Debug, Clone)]
pub struct LiveRoomView {
    room: RoomId,
    session: Option<SessionSnapshot>,
    status: Option<QuizStatus>,
    roster: RosterReconciler,
    timer: TimerSynchronizer,
    ended: Option<EndReason>,
    notices: Vec<String>,
}

impl LiveRoomView {
    pub fn new(room: RoomId) -> Self {
        Self {
            roster: RosterReconciler::new(room.clone()),
            timer: TimerSynchronizer::new(room.clone()),
            room,
            session: None,
            status: None,
            ended: None,
            notices: Vec::new(),
        }
    }

    /// Applies one event. Nothing changes after `ended`.
    pub fn apply(&mut self, message: &ServerMessage, now: DateTime<Utc>) {
        if self.ended.is_some() {
            return;
        }
        if let ServerMessage::ErrorNotice { room: None, message } = message {
            self.notices.push(message.clone());
            return;
        }
        if message.room() != Some(&self.room) {
            return;
        }

        self.roster.apply(message);
        self.timer.apply(message, now);
        match message {
            ServerMessage::Joined { session, .. } => {
                self.status = Some(session.status);
                self.session = Some(session.clone());
            }
            ServerMessage::Status { status, .. } => self.status = Some(*status),
            ServerMessage::Ended { reason, .. } => {
                self.status = Some(QuizStatus::Completed);
                self.ended = Some(*reason);
            }
            ServerMessage::ErrorNotice { message, .. } => self.notices.push(message.clone()),
            _ => {}
        }
    }

    pub fn tick(&mut self) -> bool {
        if self.ended.is_some() || !self.is_live() {
            return false;
        }
        self.timer.tick()
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn session(&self) -> Option<&SessionSnapshot> {
        self.session.as_ref()
    }

    pub fn status(&self) -> Option<QuizStatus> {
        self.status
    }

    pub fn is_live(&self) -> bool {
        self.status.is_some_and(QuizStatus::is_live)
    }

    pub fn roster(&self) -> &RosterReconciler {
        &self.roster
    }

    pub fn timer(&self) -> &TimerSynchronizer {
        &self.timer
    }

    pub fn ended(&self) -> Option<EndReason> {
        self.ended
    }

    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn input_enabled(&self) -> bool {
        self.ended.is_none() && self.is_live() && !self.timer.is_time_up()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Answering,
    /// Local timer hit zero; waiting for the server to end the quiz.
    TimeUp,
    Ended {
        reason: Option<EndReason>,
        redirect_after: Duration,
    },
}

/// Who the answers are submitted as.
#[derive(Debug, Clone)]
pub enum SubmitAs {
    Registered(ParticipantIdentity),
    Guest(GuestIdentity),
}

impl SubmitAs {
    pub fn identity(&self) -> ParticipantIdentity {
        match self {
            SubmitAs::Registered(identity) => identity.clone(),
            SubmitAs::Guest(guest) => guest.participant_identity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantOutcome {
    pub reason: Option<EndReason>,
    pub receipt: Option<SubmitAnswersResponse>,
    pub submitted: bool,
    /// Last submission failure, if the answers never went through.
    pub submit_error: Option<ClientError>,
}

/// A student's or guest's run through one live quiz.
pub struct ParticipantSession {
    api: Arc<dyn LiveQuizApi>,
    quiz_id: String,
    submit_as: SubmitAs,
    view: LiveRoomView,
    answers: Vec<AnswerItem>,
    submitted: bool,
    receipt: Option<SubmitAnswersResponse>,
    submit_error: Option<ClientError>,
    auto_submit_attempted: bool,
    submit_retry: RetryConfig,
    redirect_after: Duration,
}

impl ParticipantSession {
    pub fn new(api: Arc<dyn LiveQuizApi>, quiz_id: impl Into<String>, submit_as: SubmitAs) -> Self {
        let quiz_id = quiz_id.into();
        Self {
            api,
            view: LiveRoomView::new(RoomId::quiz(&quiz_id)),
            quiz_id,
            submit_as,
            answers: Vec::new(),
            submitted: false,
            receipt: None,
            submit_error: None,
            auto_submit_attempted: false,
            submit_retry: RetryConfig::default(),
            redirect_after: DEFAULT_REDIRECT_AFTER,
        }
    }

    pub fn with_redirect_after(mut self, delay: Duration) -> Self {
        self.redirect_after = delay;
        self
    }

    /// Backoff for automatic submission after transport failures.
    pub fn with_submit_retry(mut self, retry: RetryConfig) -> Self {
        self.submit_retry = retry;
        self
    }

    pub fn room(&self) -> &RoomId {
        self.view.room()
    }

    /// Identity to present when joining the quiz room.
    pub fn identity(&self) -> ParticipantIdentity {
        self.submit_as.identity()
    }

    pub fn view(&self) -> &LiveRoomView {
        &self.view
    }

    pub fn answers(&self) -> &[AnswerItem] {
        &self.answers
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub fn submit_error(&self) -> Option<&ClientError> {
        self.submit_error.as_ref()
    }

    pub fn outcome(&self) -> ParticipantOutcome {
        ParticipantOutcome {
            reason: self.view.ended(),
            receipt: self.receipt.clone(),
            submitted: self.submitted,
            submit_error: self.submit_error.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        if self.view.ended().is_some() || self.view.status() == Some(QuizStatus::Completed) {
            return Phase::Ended {
                reason: self.view.ended(),
                redirect_after: self.redirect_after,
            };
        }
        if !self.view.is_live() {
            return Phase::Waiting;
        }
        if self.view.timer().is_time_up() {
            Phase::TimeUp
        } else {
            Phase::Answering
        }
    }

    /// Records or replaces the answer for one question.
    pub fn record_answer(&mut self, answer: AnswerItem) -> Result<(), ClientError> {
        if self.submitted {
            return Err(ClientError::AlreadySubmitted("Answers already submitted".to_string()));
        }
        if !self.view.input_enabled() {
            return Err(match self.phase() {
                Phase::Waiting => ClientError::NotLive("This quiz has not started yet".to_string()),
                _ => ClientError::SessionEnded("Time is up for this quiz".to_string()),
            });
        }
        match self
            .answers
            .iter_mut()
            .find(|existing| existing.question_id == answer.question_id)
        {
            Some(existing) => *existing = answer,
            None => self.answers.push(answer),
        }
        Ok(())
    }

    /// Sends the recorded answers. Succeeds at most once; a failure may be retried.
    pub async fn submit(&mut self) -> Result<SubmitAnswersResponse, ClientError> {
        if self.submitted {
            return Err(ClientError::AlreadySubmitted("Answers already submitted".to_string()));
        }
        let result = match &self.submit_as {
            SubmitAs::Registered(_) => {
                let request = SubmitAnswersRequest {
                    quiz_id: self.quiz_id.clone(),
                    answers: self.answers.clone(),
                };
                self.api.submit_answers(&request).await
            }
            SubmitAs::Guest(guest) => {
                let request = SubmitGuestAnswersRequest {
                    quiz_id: self.quiz_id.clone(),
                    answers: self.answers.clone(),
                    guest: guest.guest_fields(),
                };
                self.api.submit_guest_answers(&request).await
            }
        };

        match result {
            Ok(receipt) => {
                tracing::info!(quiz_id = %self.quiz_id, accepted = receipt.accepted, "Answers submitted");
                self.submitted = true;
                self.receipt = Some(receipt.clone());
                self.submit_error = None;
                Ok(receipt)
            }
            Err(err @ ClientError::AlreadySubmitted(_)) => {
                self.submitted = true;
                self.submit_error = None;
                Err(err)
            }
            Err(err) => {
                tracing::warn!(quiz_id = %self.quiz_id, error = %err, "Answer submission failed");
                self.submit_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Feeds one room event and submits automatically when the quiz closes.
    pub async fn on_event(&mut self, message: &ServerMessage) {
        self.view.apply(message, Utc::now());
        self.maybe_auto_submit().await;
    }

    pub async fn on_tick(&mut self) {
        if self.view.tick() {
            tracing::debug!(quiz_id = %self.quiz_id, "Local timer reached zero");
        }
        self.maybe_auto_submit().await;
    }

    async fn maybe_auto_submit(&mut self) {
        let closing = matches!(self.phase(), Phase::TimeUp | Phase::Ended { .. });
        if !closing || self.submitted || self.auto_submit_attempted || self.answers.is_empty() {
            return;
        }
        self.auto_submit_attempted = true;

        let mut attempt: u32 = 1;
        loop {
            match self.submit().await {
                Err(err) if err.is_retryable() && (attempt as usize) < self.submit_retry.max_attempts => {
                    tokio::time::sleep(self.submit_retry.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(ClientError::AlreadySubmitted(_)) | Ok(_) => return,
                Err(err) => {
                    tracing::error!(quiz_id = %self.quiz_id, attempts = attempt, error = %err, "Automatic submission gave up");
                    return;
                }
            }
        }
    }

    /// Drives the session from room events and the local ticker until the
    /// quiz ends (plus the redirect delay) or the subscription closes.
    pub async fn run(&mut self, mut subscription: RoomSubscription) -> ParticipantOutcome {
        let mut countdown: Option<Countdown> = None;
        loop {
            let ticking = self.view.timer().is_timed() && self.phase() == Phase::Answering;
            if ticking && countdown.is_none() {
                countdown = Some(spawn_countdown(Duration::from_secs(1)));
            } else if !ticking {
                countdown = None;
            }

            tokio::select! {
                event = subscription.next() => match event {
                    Some(message) => self.on_event(&message).await,
                    None => break,
                },
                Some(()) = next_tick(&mut countdown) => self.on_tick().await,
            }

            if self.view.ended().is_some() {
                drop(countdown.take());
                tokio::time::sleep(self.redirect_after).await;
                break;
            }
        }

        self.outcome()
    }
}

async fn next_tick(countdown: &mut Option<Countdown>) -> Option<()> {
    match countdown {
        Some(countdown) => countdown.tick().await,
        None => std::future::pending().await,
    }
}
