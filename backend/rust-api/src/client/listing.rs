use serde::Serialize;

use super::channel::RoomSubscription;
use crate::models::{RoomId, ServerMessage, SessionSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveQuizEntry {
    pub quiz_id: String,
    pub title: String,
}

/// Quizzes currently live in one department, in announcement order.
#[derive(Debug, Clone)]
pub struct DepartmentFeed {
    room: RoomId,
    live: Vec<LiveQuizEntry>,
}

impl DepartmentFeed {
    pub fn new(department_id: impl Into<String>) -> Self {
        Self {
            room: RoomId::department(department_id),
            live: Vec::new(),
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn entries(&self) -> &[LiveQuizEntry] {
        &self.live
    }

    /// Seeds from a REST listing; only live sessions are kept.
    pub fn seed(&mut self, sessions: &[SessionSnapshot]) {
        for session in sessions.iter().filter(|s| s.is_live) {
            self.insert(&session.quiz_id, &session.title);
        }
    }

    /// Returns true when the set of live quizzes changed.
    pub fn apply(&mut self, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::QuizWentLive { room, quiz_id, title } if *room == self.room => {
                self.insert(quiz_id, title)
            }
            ServerMessage::QuizClosed { room, quiz_id } if *room == self.room => {
                let before = self.live.len();
                self.live.retain(|entry| entry.quiz_id != *quiz_id);
                self.live.len() != before
            }
            _ => false,
        }
    }

    /// Waits for the next event that changes the feed.
    pub async fn next_change(&mut self, subscription: &mut RoomSubscription) -> Option<&[LiveQuizEntry]> {
        loop {
            let message = subscription.next().await?;
            if self.apply(&message) {
                return Some(&self.live);
            }
        }
    }

    fn insert(&mut self, quiz_id: &str, title: &str) -> bool {
        match self.live.iter_mut().find(|entry| entry.quiz_id == quiz_id) {
            Some(existing) if existing.title == title => false,
            Some(existing) => {
                existing.title = title.to_string();
                true
            }
            None => {
                self.live.push(LiveQuizEntry {
                    quiz_id: quiz_id.to_string(),
                    title: title.to_string(),
                });
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn went_live(dept: &str, quiz_id: &str) -> ServerMessage {
        ServerMessage::QuizWentLive {
            room: RoomId::department(dept),
            quiz_id: quiz_id.to_string(),
            title: format!("Quiz {}", quiz_id),
        }
    }

    #[test]
    fn test_announcements_deduplicated() {
        let mut feed = DepartmentFeed::new("d1");
        assert!(feed.apply(&went_live("d1", "q1")));
        assert!(!feed.apply(&went_live("d1", "q1")));
        assert!(feed.apply(&went_live("d1", "q2")));
        assert_eq!(feed.entries().len(), 2);
    }

    #[test]
    fn test_closed_quiz_removed() {
        let mut feed = DepartmentFeed::new("d1");
        feed.apply(&went_live("d1", "q1"));
        assert!(feed.apply(&ServerMessage::QuizClosed {
            room: RoomId::department("d1"),
            quiz_id: "q1".to_string(),
        }));
        assert!(feed.entries().is_empty());
    }

    #[test]
    fn test_other_departments_ignored() {
        let mut feed = DepartmentFeed::new("d1");
        assert!(!feed.apply(&went_live("d2", "q1")));
        assert!(feed.entries().is_empty());
    }
}
