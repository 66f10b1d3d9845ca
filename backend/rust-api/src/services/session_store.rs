use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{LiveQuizError, Result};
use crate::models::live_quiz::{CreateLiveQuizRequest, ScheduledTransition};
use crate::models::{EndReason, QuizSession, ScheduledWindow};

/// Process-wide map from quiz id to session state. The single source of truth.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, QuizSession>>,
}

/// A transition applied by the scheduler, with the session as it stands afterwards.
#[derive(Debug, Clone)]
pub struct DueTransition {
    pub session: QuizSession,
    pub transition: ScheduledTransition,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create(&self, req: CreateLiveQuizRequest, now: DateTime<Utc>) -> QuizSession {
        let quiz_id = Uuid::new_v4().to_string();
        let session = QuizSession::new(
            quiz_id.clone(),
            req.title.trim(),
            req.department_id.filter(|d| !d.trim().is_empty()),
            req.time_limit,
            now,
        );

        self.sessions.write().await.insert(quiz_id.clone(), session.clone());
        tracing::info!(quiz_id = %quiz_id, "Live quiz created");
        session
    }

    pub async fn get(&self, quiz_id: &str) -> Result<QuizSession> {
        self.sessions
            .read()
            .await
            .get(quiz_id)
            .cloned()
            .ok_or_else(|| LiveQuizError::NotFound(quiz_id.to_string()))
    }

    pub async fn list(&self, department_id: Option<&str>) -> Vec<QuizSession> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<QuizSession> = sessions
            .values()
            .filter(|s| department_id.is_none() || s.department_id.as_deref() == department_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching
    }

    pub async fn start(&self, quiz_id: &str, now: DateTime<Utc>) -> Result<QuizSession> {
        self.mutate(quiz_id, |s| s.start(now)).await
    }

    pub async fn end(&self, quiz_id: &str, now: DateTime<Utc>, reason: EndReason) -> Result<QuizSession> {
        self.mutate(quiz_id, |s| s.end(now, reason)).await
    }

    pub async fn schedule(
        &self,
        quiz_id: &str,
        window: ScheduledWindow,
        now: DateTime<Utc>,
    ) -> Result<QuizSession> {
        self.mutate(quiz_id, |s| s.schedule(window, now)).await
    }

    pub async fn cancel_schedule(&self, quiz_id: &str) -> Result<QuizSession> {
        self.mutate(quiz_id, |s| s.cancel_schedule()).await
    }

    /// Applies every transition that is due at `now`.
    pub async fn advance_all(&self, now: DateTime<Utc>) -> Vec<DueTransition> {
        let mut sessions = self.sessions.write().await;
        sessions
            .values_mut()
            .filter_map(|session| {
                session.advance(now).map(|transition| DueTransition {
                    session: session.clone(),
                    transition,
                })
            })
            .collect()
    }

    pub async fn live_sessions(&self) -> Vec<QuizSession> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_live())
            .cloned()
            .collect()
    }

    // Transitions run against a copy so a rejected command leaves no partial state.
    async fn mutate<F, E>(&self, quiz_id: &str, apply: F) -> Result<QuizSession>
    where
        F: FnOnce(&mut QuizSession) -> std::result::Result<(), E>,
        E: Into<LiveQuizError>,
    {
        let mut sessions = self.sessions.write().await;
        let current = sessions
            .get_mut(quiz_id)
            .ok_or_else(|| LiveQuizError::NotFound(quiz_id.to_string()))?;

        let mut next = current.clone();
        apply(&mut next).map_err(Into::into)?;
        *current = next.clone();
        Ok(next)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
