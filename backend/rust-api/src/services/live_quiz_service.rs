use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use validator::Validate;

use super::room_hub::{ConnId, JoinTicket, RoomHub};
use super::session_store::SessionStore;
use crate::config::LiveConfig;
use crate::error::{LiveQuizError, Result};
use crate::metrics::{record_transition, LIVE_SESSIONS_ACTIVE};
use crate::models::live_quiz::{CreateLiveQuizRequest, ScheduledTransition};
use crate::models::{
    EndReason, Participant, ParticipantIdentity, QuizSession, QuizStatus, RoomId,
    ScheduledWindow, ServerMessage, SessionSnapshot,
};

/// What a connection gets back from a successful join.
pub struct JoinOutcome {
    /// Sent to the joiner only, in order, before anything from `receiver`.
    pub initial: Vec<ServerMessage>,
    pub receiver: broadcast::Receiver<ServerMessage>,
}

/// Owns the session store and the room hub, and keeps the rooms in step
/// with every transition the store accepts.
pub struct LiveQuizService {
    store: SessionStore,
    hub: RoomHub,
    config: LiveConfig,
}

impl LiveQuizService {
    pub fn new(config: LiveConfig) -> Self {
        Self {
            store: SessionStore::new(),
            hub: RoomHub::new(config.room_channel_capacity),
            config,
        }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub async fn create(&self, req: CreateLiveQuizRequest) -> Result<SessionSnapshot> {
        req.validate()?;
        if req.title.trim().is_empty() {
            return Err(LiveQuizError::validation("Title must not be blank"));
        }
        Ok(self.store.create(req, Utc::now()).await.snapshot())
    }

    pub async fn session(&self, quiz_id: &str) -> Result<QuizSession> {
        self.store.get(quiz_id).await
    }

    pub async fn get(&self, quiz_id: &str) -> Result<SessionSnapshot> {
        Ok(self.store.get(quiz_id).await?.snapshot())
    }

    pub async fn list(&self, department_id: Option<&str>) -> Vec<SessionSnapshot> {
        self.store
            .list(department_id)
            .await
            .iter()
            .map(QuizSession::snapshot)
            .collect()
    }

    pub async fn roster(&self, quiz_id: &str) -> Result<Vec<Participant>> {
        self.store.get(quiz_id).await?;
        Ok(self.hub.roster(&RoomId::quiz(quiz_id)).await)
    }

    pub async fn start(&self, quiz_id: &str) -> Result<SessionSnapshot> {
        let now = Utc::now();
        let session = self.store.start(quiz_id, now).await?;
        tracing::info!(quiz_id = %quiz_id, "Live quiz started");
        record_transition(QuizStatus::Live.as_str(), "manual");
        self.publish_live(&session, now).await;
        Ok(session.snapshot())
    }

    pub async fn end(&self, quiz_id: &str) -> Result<SessionSnapshot> {
        let session = self.store.end(quiz_id, Utc::now(), EndReason::Manual).await?;
        tracing::info!(quiz_id = %quiz_id, "Live quiz ended");
        record_transition(QuizStatus::Completed.as_str(), EndReason::Manual.as_str());
        self.publish_ended(&session, EndReason::Manual).await;
        Ok(session.snapshot())
    }

    pub async fn schedule(&self, quiz_id: &str, window: ScheduledWindow) -> Result<SessionSnapshot> {
        let session = self.store.schedule(quiz_id, window, Utc::now()).await?;
        tracing::info!(
            quiz_id = %quiz_id,
            start_at = %window.start_at,
            end_at = %window.end_at,
            "Live quiz scheduled"
        );
        record_transition(QuizStatus::Scheduled.as_str(), "manual");
        self.publish_status(&session).await;
        Ok(session.snapshot())
    }

    pub async fn cancel_schedule(&self, quiz_id: &str) -> Result<SessionSnapshot> {
        let session = self.store.cancel_schedule(quiz_id).await?;
        tracing::info!(quiz_id = %quiz_id, "Live quiz schedule cancelled");
        record_transition(QuizStatus::Draft.as_str(), "manual");
        self.publish_status(&session).await;
        Ok(session.snapshot())
    }

    /// Subscribes `conn` to `room`.
    ///
    /// Quiz rooms answer with `joined`, `status`, `roster` and, when live and
    /// timed, a `timerSnapshot`. A completed quiz answers with `joined` and
    /// `ended`. Department rooms answer with a `quizWentLive` for each quiz
    /// of that department that is already live.
    pub async fn join(
        &self,
        conn: ConnId,
        room: &RoomId,
        identity: Option<ParticipantIdentity>,
    ) -> Result<JoinOutcome> {
        if let Some(identity) = &identity {
            identity.validate()?;
        }

        match room {
            RoomId::Quiz(quiz_id) => {
                let session = self.store.get(quiz_id).await?;
                if session.status() == QuizStatus::Completed {
                    let reason = session.end_reason().unwrap_or(EndReason::Manual);
                    self.hub.end_room(room, reason).await;
                    let ticket = self.hub.join(conn, room, None).await;
                    return Ok(JoinOutcome {
                        initial: vec![
                            ServerMessage::Joined {
                                room: room.clone(),
                                session: session.snapshot(),
                            },
                            ServerMessage::Ended {
                                room: room.clone(),
                                reason: ticket.ended.unwrap_or(reason),
                            },
                        ],
                        receiver: ticket.receiver,
                    });
                }

                let ticket = self.hub.join(conn, room, identity).await;
                self.quiz_room_greeting(quiz_id, room, ticket).await
            }
            RoomId::Department(department_id) => {
                let ticket = self.hub.join(conn, room, None).await;
                let initial = self
                    .store
                    .list(Some(department_id))
                    .await
                    .into_iter()
                    .filter(QuizSession::is_live)
                    .map(|session| ServerMessage::QuizWentLive {
                        room: room.clone(),
                        quiz_id: session.quiz_id,
                        title: session.title,
                    })
                    .collect();
                Ok(JoinOutcome {
                    initial,
                    receiver: ticket.receiver,
                })
            }
        }
    }

    /// Builds what a quiz room joiner sees first, read after `ticket`
    /// subscribed. A transition committed before the subscription shows up
    /// here; anything later arrives through the receiver.
    async fn quiz_room_greeting(
        &self,
        quiz_id: &str,
        room: &RoomId,
        ticket: JoinTicket,
    ) -> Result<JoinOutcome> {
        let session = self.store.get(quiz_id).await?;
        let mut initial = vec![
            ServerMessage::Joined {
                room: room.clone(),
                session: session.snapshot(),
            },
            ServerMessage::status(room.clone(), session.status()),
            ServerMessage::Roster {
                room: room.clone(),
                participants: ticket.roster,
            },
        ];
        if let Some(snapshot) = session.timer_snapshot(Utc::now()) {
            initial.push(ServerMessage::TimerSnapshot {
                room: room.clone(),
                snapshot,
            });
        }
        if let Some(reason) = ticket.ended {
            initial.push(ServerMessage::Ended {
                room: room.clone(),
                reason,
            });
        }
        Ok(JoinOutcome {
            initial,
            receiver: ticket.receiver,
        })
    }

    pub async fn leave(&self, conn: ConnId, room: &RoomId) {
        self.hub.leave(conn, room).await;
    }

    pub async fn disconnect(&self, conn: ConnId) {
        self.hub.disconnect(conn, Utc::now()).await;
    }

    /// One scheduler pass: apply due transitions, optionally broadcast timer
    /// snapshots for live timed sessions, prune stale roster entries.
    pub async fn tick(&self, now: DateTime<Utc>, broadcast_timers: bool) -> usize {
        let due = self.store.advance_all(now).await;
        let applied = due.len();

        for item in due {
            match item.transition {
                ScheduledTransition::WentLive => {
                    tracing::info!(quiz_id = %item.session.quiz_id, "Scheduled live quiz opened");
                    record_transition(QuizStatus::Live.as_str(), "schedule");
                    self.publish_live(&item.session, now).await;
                }
                ScheduledTransition::Ended(reason) => {
                    tracing::info!(
                        quiz_id = %item.session.quiz_id,
                        reason = reason.as_str(),
                        "Live quiz closed by scheduler"
                    );
                    record_transition(QuizStatus::Completed.as_str(), reason.as_str());
                    self.publish_ended(&item.session, reason).await;
                }
            }
        }

        if broadcast_timers {
            for session in self.store.live_sessions().await {
                if let Some(snapshot) = session.timer_snapshot(now) {
                    let room = RoomId::quiz(&session.quiz_id);
                    self.hub
                        .broadcast(&room, ServerMessage::TimerSnapshot { room: room.clone(), snapshot })
                        .await;
                }
            }
        }

        self.hub
            .prune_disconnected(now, self.config.disconnect_grace())
            .await;
        self.refresh_active_gauge().await;
        applied
    }

    async fn publish_status(&self, session: &QuizSession) {
        let room = RoomId::quiz(&session.quiz_id);
        self.hub
            .broadcast(&room, ServerMessage::status(room.clone(), session.status()))
            .await;
    }

    async fn publish_live(&self, session: &QuizSession, now: DateTime<Utc>) {
        self.publish_status(session).await;

        let room = RoomId::quiz(&session.quiz_id);
        if let Some(snapshot) = session.timer_snapshot(now) {
            self.hub
                .broadcast(&room, ServerMessage::TimerSnapshot { room: room.clone(), snapshot })
                .await;
        }

        if let Some(department_id) = &session.department_id {
            let department = RoomId::department(department_id);
            self.hub
                .broadcast(
                    &department,
                    ServerMessage::QuizWentLive {
                        room: department.clone(),
                        quiz_id: session.quiz_id.clone(),
                        title: session.title.clone(),
                    },
                )
                .await;
        }
        self.refresh_active_gauge().await;
    }

    async fn publish_ended(&self, session: &QuizSession, reason: EndReason) {
        self.publish_status(session).await;
        self.hub.end_room(&RoomId::quiz(&session.quiz_id), reason).await;

        if let Some(department_id) = &session.department_id {
            let department = RoomId::department(department_id);
            self.hub
                .broadcast(
                    &department,
                    ServerMessage::QuizClosed {
                        room: department.clone(),
                        quiz_id: session.quiz_id.clone(),
                    },
                )
                .await;
        }
        self.refresh_active_gauge().await;
    }

    async fn refresh_active_gauge(&self) {
        LIVE_SESSIONS_ACTIVE.set(self.store.live_sessions().await.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn service() -> LiveQuizService {
        LiveQuizService::new(LiveConfig::default())
    }

    fn create_request(title: &str, department: Option<&str>, limit: Option<i64>) -> CreateLiveQuizRequest {
        CreateLiveQuizRequest {
            title: title.to_string(),
            department_id: department.map(str::to_string),
            time_limit: limit,
        }
    }

    #[tokio::test]
    async fn test_blank_title_rejected() {
        let err = service().create(create_request("   ", None, None)).await.unwrap_err();
        assert!(matches!(err, LiveQuizError::Validation(_)));
    }

    #[tokio::test]
    async fn test_join_live_timed_quiz_sends_full_state() {
        let service = service();
        let quiz = service.create(create_request("Quiz", None, Some(120))).await.unwrap();
        service.start(&quiz.quiz_id).await.unwrap();

        let outcome = service
            .join(
                Uuid::new_v4(),
                &RoomId::quiz(&quiz.quiz_id),
                Some(ParticipantIdentity::guest("g1", "Sam")),
            )
            .await
            .unwrap();

        let names: Vec<&str> = outcome.initial.iter().map(ServerMessage::event_name).collect();
        assert_eq!(names, vec!["joined", "status", "roster", "timer_snapshot"]);
    }

    #[tokio::test]
    async fn test_start_between_lookup_and_subscribe_reaches_joiner() {
        let service = service();
        let quiz = service.create(create_request("Quiz", None, Some(60))).await.unwrap();
        let room = RoomId::quiz(&quiz.quiz_id);
        assert_eq!(service.session(&quiz.quiz_id).await.unwrap().status(), QuizStatus::Draft);

        // the start broadcast goes out before this connection subscribes
        service.start(&quiz.quiz_id).await.unwrap();
        let ticket = service
            .hub
            .join(Uuid::new_v4(), &room, Some(ParticipantIdentity::guest("g1", "Sam")))
            .await;
        let outcome = service.quiz_room_greeting(&quiz.quiz_id, &room, ticket).await.unwrap();

        match &outcome.initial[0] {
            ServerMessage::Joined { session, .. } => {
                assert_eq!(session.status, QuizStatus::Live);
                assert!(session.is_live);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            outcome.initial[1],
            ServerMessage::Status { status: QuizStatus::Live, is_live: true, .. }
        ));
        assert!(outcome
            .initial
            .iter()
            .any(|m| matches!(m, ServerMessage::TimerSnapshot { .. })));
    }

    #[tokio::test]
    async fn test_join_completed_quiz_sends_ended() {
        let service = service();
        let quiz = service.create(create_request("Quiz", None, None)).await.unwrap();
        service.start(&quiz.quiz_id).await.unwrap();
        service.end(&quiz.quiz_id).await.unwrap();

        let outcome = service
            .join(Uuid::new_v4(), &RoomId::quiz(&quiz.quiz_id), None)
            .await
            .unwrap();
        assert!(matches!(
            outcome.initial.last(),
            Some(ServerMessage::Ended { reason: EndReason::Manual, .. })
        ));
    }

    #[tokio::test]
    async fn test_join_unknown_quiz_is_not_found() {
        let err = service()
            .join(Uuid::new_v4(), &RoomId::quiz("nope"), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LiveQuizError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_end_broadcasts_status_then_ended() {
        let service = service();
        let quiz = service.create(create_request("Quiz", None, None)).await.unwrap();
        service.start(&quiz.quiz_id).await.unwrap();
        let mut receiver = service
            .join(Uuid::new_v4(), &RoomId::quiz(&quiz.quiz_id), None)
            .await
            .unwrap()
            .receiver;

        service.end(&quiz.quiz_id).await.unwrap();

        match receiver.recv().await.unwrap() {
            ServerMessage::Status { status, is_live, .. } => {
                assert_eq!(status, QuizStatus::Completed);
                assert!(!is_live);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(receiver.recv().await.unwrap(), ServerMessage::Ended { .. }));
    }

    #[tokio::test]
    async fn test_department_room_hears_scheduled_quiz_go_live() {
        let service = service();
        let quiz = service
            .create(create_request("Safety", Some("d1"), Some(60)))
            .await
            .unwrap();
        let now = Utc::now();
        let window = ScheduledWindow::new(now + Duration::seconds(5), now + Duration::hours(1)).unwrap();
        service.schedule(&quiz.quiz_id, window).await.unwrap();

        let mut receiver = service
            .join(Uuid::new_v4(), &RoomId::department("d1"), None)
            .await
            .unwrap()
            .receiver;

        assert_eq!(service.tick(now + Duration::seconds(6), false).await, 1);
        match receiver.recv().await.unwrap() {
            ServerMessage::QuizWentLive { quiz_id, title, .. } => {
                assert_eq!(quiz_id, quiz.quiz_id);
                assert_eq!(title, "Safety");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(service.get(&quiz.quiz_id).await.unwrap().is_live);
    }

    #[tokio::test]
    async fn test_department_join_lists_already_live_quizzes() {
        let service = service();
        let quiz = service.create(create_request("Live one", Some("d1"), None)).await.unwrap();
        service.create(create_request("Draft one", Some("d1"), None)).await.unwrap();
        service.start(&quiz.quiz_id).await.unwrap();

        let outcome = service
            .join(Uuid::new_v4(), &RoomId::department("d1"), None)
            .await
            .unwrap();
        assert_eq!(outcome.initial.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_identity_rejected() {
        let service = service();
        let quiz = service.create(create_request("Quiz", None, None)).await.unwrap();
        let err = service
            .join(
                Uuid::new_v4(),
                &RoomId::quiz(&quiz.quiz_id),
                Some(ParticipantIdentity::guest("", "Sam")),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LiveQuizError::Validation(_)));
    }
}
