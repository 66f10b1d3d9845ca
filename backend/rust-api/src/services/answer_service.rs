use crate::error::{LiveQuizError, Result};
use crate::metrics::ANSWERS_SUBMITTED_TOTAL;
use crate::models::answer::{AnswerItem, GuestFields, SubmitAnswersResponse};
use crate::models::{ParticipantKind, QuizStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use validator::Validate;

use super::live_quiz_service::LiveQuizService;

/// Who is submitting.
#[derive(Debug, Clone)]
pub enum Submitter {
    Registered {
        user_id: String,
        department_ids: Vec<String>,
        is_admin: bool,
    },
    Guest(GuestFields),
}

impl Submitter {
    fn kind(&self) -> ParticipantKind {
        match self {
            Submitter::Registered { .. } => ParticipantKind::Registered,
            Submitter::Guest(_) => ParticipantKind::Guest,
        }
    }

    fn key(&self) -> String {
        match self {
            Submitter::Registered { user_id, .. } => format!("user:{}", user_id),
            Submitter::Guest(guest) => guest.submitter_key(),
        }
    }

    fn participant_id(&self) -> String {
        match self {
            Submitter::Registered { user_id, .. } => user_id.clone(),
            Submitter::Guest(guest) => guest
                .guest_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| guest.submitter_key()),
        }
    }
}

/// Stored submission, visible to admins.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub participant_id: String,
    pub kind: ParticipantKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    pub answers: Vec<AnswerItem>,
    pub submitted_at: DateTime<Utc>,
}

fn kind_label(kind: ParticipantKind) -> &'static str {
    match kind {
        ParticipantKind::Registered => "registered",
        ParticipantKind::Guest => "guest",
    }
}

/// Accepts each participant's answers once per quiz.
pub struct AnswerService {
    live_quizzes: Arc<LiveQuizService>,
    // quiz id -> submitter key -> record
    submissions: RwLock<HashMap<String, HashMap<String, SubmissionRecord>>>,
}

impl AnswerService {
    pub fn new(live_quizzes: Arc<LiveQuizService>) -> Self {
        Self {
            live_quizzes,
            submissions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn submit(
        &self,
        submitter: Submitter,
        quiz_id: &str,
        answers: Vec<AnswerItem>,
    ) -> Result<SubmitAnswersResponse> {
        let kind = submitter.kind();
        let outcome = self.try_submit(&submitter, quiz_id, answers).await;

        let label = match &outcome {
            Ok(_) => "accepted",
            Err(LiveQuizError::AlreadySubmitted(_)) => "duplicate",
            Err(_) => "rejected",
        };
        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[kind_label(kind), label])
            .inc();
        outcome
    }

    async fn try_submit(
        &self,
        submitter: &Submitter,
        quiz_id: &str,
        answers: Vec<AnswerItem>,
    ) -> Result<SubmitAnswersResponse> {
        if let Submitter::Guest(guest) = submitter {
            guest.validate()?;
        }

        let session = self.live_quizzes.session(quiz_id).await?;

        if let Submitter::Registered {
            department_ids,
            is_admin: false,
            ..
        } = submitter
        {
            if let Some(department_id) = &session.department_id {
                if !department_ids.contains(department_id) {
                    return Err(LiveQuizError::access_denied(
                        "You are not a member of this quiz's department",
                    ));
                }
            }
        }

        let now = Utc::now();
        match session.status() {
            QuizStatus::Live => {}
            QuizStatus::Draft | QuizStatus::Scheduled => {
                return Err(LiveQuizError::NotLive(quiz_id.to_string()));
            }
            QuizStatus::Completed => {
                let grace = self.live_quizzes.config().submission_grace();
                let closed = session.ended_at().is_none_or(|ended_at| ended_at + grace < now);
                if closed {
                    return Err(LiveQuizError::SessionClosed(quiz_id.to_string()));
                }
            }
        }

        let key = submitter.key();
        let participant_id = submitter.participant_id();
        let accepted = answers.len();

        let mut submissions = self.submissions.write().await;
        let per_quiz = submissions.entry(quiz_id.to_string()).or_default();
        if per_quiz.contains_key(&key) {
            tracing::info!(quiz_id = %quiz_id, participant_id = %participant_id, "Duplicate submission refused");
            return Err(LiveQuizError::AlreadySubmitted(quiz_id.to_string()));
        }

        per_quiz.insert(
            key,
            SubmissionRecord {
                participant_id: participant_id.clone(),
                kind: submitter.kind(),
                guest_name: match submitter {
                    Submitter::Guest(guest) => Some(guest.name.trim().to_string()),
                    Submitter::Registered { .. } => None,
                },
                answers,
                submitted_at: now,
            },
        );

        tracing::info!(
            quiz_id = %quiz_id,
            participant_id = %participant_id,
            kind = kind_label(submitter.kind()),
            accepted,
            "Answers submitted"
        );

        Ok(SubmitAnswersResponse {
            quiz_id: quiz_id.to_string(),
            participant_id,
            kind: submitter.kind(),
            accepted,
            submitted_at: now,
        })
    }

    pub async fn submissions(&self, quiz_id: &str) -> Result<Vec<SubmissionRecord>> {
        self.live_quizzes.session(quiz_id).await?;
        let mut records: Vec<SubmissionRecord> = self
            .submissions
            .read()
            .await
            .get(quiz_id)
            .map(|per_quiz| per_quiz.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|record| record.submitted_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiveConfig;
    use crate::models::live_quiz::CreateLiveQuizRequest;

    async fn live_quiz(department: Option<&str>) -> (AnswerService, Arc<LiveQuizService>, String) {
        let live = Arc::new(LiveQuizService::new(LiveConfig::default()));
        let quiz = live
            .create(CreateLiveQuizRequest {
                title: "Quiz".to_string(),
                department_id: department.map(str::to_string),
                time_limit: None,
            })
            .await
            .unwrap();
        (AnswerService::new(live.clone()), live, quiz.quiz_id)
    }

    fn student(id: &str, departments: &[&str]) -> Submitter {
        Submitter::Registered {
            user_id: id.to_string(),
            department_ids: departments.iter().map(|d| d.to_string()).collect(),
            is_admin: false,
        }
    }

    fn guest(name: &str, email: Option<&str>) -> Submitter {
        Submitter::Guest(GuestFields {
            is_guest: true,
            guest_id: None,
            name: name.to_string(),
            email: email.map(str::to_string),
            mobile: None,
        })
    }

    fn answers() -> Vec<AnswerItem> {
        vec![AnswerItem {
            question_id: "q1".to_string(),
            answer_text: "42".to_string(),
            time_taken: 7,
        }]
    }

    #[tokio::test]
    async fn test_draft_quiz_refuses_with_not_live() {
        let (service, _, quiz_id) = live_quiz(None).await;
        let err = service.submit(student("u1", &[]), &quiz_id, answers()).await.unwrap_err();
        assert!(matches!(err, LiveQuizError::NotLive(_)));
    }

    #[tokio::test]
    async fn test_second_submission_refused() {
        let (service, live, quiz_id) = live_quiz(None).await;
        live.start(&quiz_id).await.unwrap();

        let first = service.submit(student("u1", &[]), &quiz_id, answers()).await.unwrap();
        assert_eq!(first.accepted, 1);
        assert_eq!(first.kind, ParticipantKind::Registered);

        let err = service.submit(student("u1", &[]), &quiz_id, answers()).await.unwrap_err();
        assert!(matches!(err, LiveQuizError::AlreadySubmitted(_)));
        assert_eq!(service.submissions(&quiz_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_department_membership_enforced() {
        let (service, live, quiz_id) = live_quiz(Some("d1")).await;
        live.start(&quiz_id).await.unwrap();

        let err = service.submit(student("u1", &["d2"]), &quiz_id, answers()).await.unwrap_err();
        assert!(matches!(err, LiveQuizError::AccessDenied(_)));
        assert!(service.submit(student("u2", &["d1"]), &quiz_id, answers()).await.is_ok());
    }

    #[tokio::test]
    async fn test_guest_without_contact_rejected() {
        let (service, live, quiz_id) = live_quiz(None).await;
        live.start(&quiz_id).await.unwrap();

        let err = service.submit(guest("Ann", None), &quiz_id, answers()).await.unwrap_err();
        assert!(matches!(err, LiveQuizError::Validation(_)));

        let ok = service
            .submit(guest("Ann", Some("a@b.com")), &quiz_id, answers())
            .await
            .unwrap();
        assert_eq!(ok.kind, ParticipantKind::Guest);
        assert_eq!(ok.participant_id, "guest-contact:a@b.com");
    }

    #[tokio::test]
    async fn test_submission_within_grace_after_end() {
        let (service, live, quiz_id) = live_quiz(None).await;
        live.start(&quiz_id).await.unwrap();
        live.end(&quiz_id).await.unwrap();

        assert!(service.submit(guest("Ann", Some("a@b.com")), &quiz_id, answers()).await.is_ok());
    }

    #[tokio::test]
    async fn test_submission_after_grace_is_closed() {
        let live = Arc::new(LiveQuizService::new(LiveConfig {
            submission_grace_secs: 0,
            ..LiveConfig::default()
        }));
        let quiz = live
            .create(CreateLiveQuizRequest {
                title: "Quiz".to_string(),
                department_id: None,
                time_limit: None,
            })
            .await
            .unwrap();
        live.start(&quiz.quiz_id).await.unwrap();
        live.end(&quiz.quiz_id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let service = AnswerService::new(live);
        let err = service
            .submit(student("u1", &[]), &quiz.quiz_id, answers())
            .await
            .unwrap_err();
        assert!(matches!(err, LiveQuizError::SessionClosed(_)));
    }
}
