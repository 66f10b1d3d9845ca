use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::participant::ParticipantKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerItem {
    pub question_id: String,
    pub answer_text: String,
    /// Seconds spent on the question.
    #[serde(default)]
    pub time_taken: u32,
}

/// `POST /live-quiz-answers/submit-multiple`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswersRequest {
    #[validate(length(min = 1, message = "quizId is required"))]
    pub quiz_id: String,
    pub answers: Vec<AnswerItem>,
}

/// Guest identity attached to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_guest_contact", skip_on_field_errors = false))]
pub struct GuestFields {
    pub is_guest: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
    #[validate(custom(function = "validate_non_blank", message = "Name is required"))]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
}

impl GuestFields {
    pub fn email(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    pub fn mobile(&self) -> Option<&str> {
        non_blank(self.mobile.as_deref())
    }

    /// Stable key for exactly-once bookkeeping when no guest id was sent.
    pub fn submitter_key(&self) -> String {
        if let Some(id) = self.guest_id.as_deref().and_then(|id| non_blank(Some(id))) {
            return format!("guest:{}", id);
        }
        let contact = self
            .email()
            .map(|email| email.to_lowercase())
            .or_else(|| self.mobile().map(|m| m.chars().filter(|c| c.is_ascii_digit()).collect()))
            .unwrap_or_default();
        format!("guest-contact:{}", contact)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn validate_non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Presence only: at least one of email or mobile, whatever its shape.
fn validate_guest_contact(fields: &GuestFields) -> Result<(), ValidationError> {
    if !fields.is_guest {
        return Err(ValidationError::new("not_guest").with_message("isGuest must be true".into()));
    }
    if fields.email().is_none() && fields.mobile().is_none() {
        return Err(ValidationError::new("contact_required")
            .with_message("Email or mobile is required".into()));
    }
    Ok(())
}

/// `POST /live-quiz-answers/submit-multiple-guest`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitGuestAnswersRequest {
    #[validate(length(min = 1, message = "quizId is required"))]
    pub quiz_id: String,
    pub answers: Vec<AnswerItem>,
    #[serde(flatten)]
    #[validate(nested)]
    pub guest: GuestFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswersResponse {
    pub quiz_id: String,
    pub participant_id: String,
    pub kind: ParticipantKind,
    pub accepted: usize,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest(name: &str, email: Option<&str>, mobile: Option<&str>) -> GuestFields {
        GuestFields {
            is_guest: true,
            guest_id: None,
            name: name.to_string(),
            email: email.map(str::to_string),
            mobile: mobile.map(str::to_string),
        }
    }

    #[test]
    fn blank_name_is_rejected_regardless_of_contact() {
        assert!(guest("", Some("a@b.com"), Some("555-1234")).validate().is_err());
        assert!(guest("   ", Some("a@b.com"), None).validate().is_err());
    }

    #[test]
    fn name_without_contact_is_rejected() {
        assert!(guest("Ann", Some(""), Some("")).validate().is_err());
        assert!(guest("Ann", None, None).validate().is_err());
    }

    #[test]
    fn name_with_one_contact_is_accepted() {
        assert!(guest("Ann", Some("a@b.com"), None).validate().is_ok());
        assert!(guest("Sam", None, Some("555-1234")).validate().is_ok());
    }

    #[test]
    fn contact_shape_is_not_checked() {
        assert!(guest("Ann", Some("not-an-email"), Some("555-1234")).validate().is_ok());
        assert!(guest("Ann", None, Some("call me")).validate().is_ok());
    }

    #[test]
    fn submitter_key_prefers_guest_id() {
        let mut fields = guest("Ann", Some("A@B.com"), None);
        assert_eq!(fields.submitter_key(), "guest-contact:a@b.com");
        fields.guest_id = Some("g-1".to_string());
        assert_eq!(fields.submitter_key(), "guest:g-1");
    }

    #[test]
    fn guest_request_flattens_identity() {
        let req: SubmitGuestAnswersRequest = serde_json::from_value(serde_json::json!({
            "quizId": "q1",
            "answers": [{"questionId": "1", "answerText": "B", "timeTaken": 4}],
            "isGuest": true,
            "name": "Sam",
            "mobile": "555-1234"
        }))
        .unwrap();
        assert_eq!(req.guest.name, "Sam");
        assert_eq!(req.answers[0].time_taken, 4);
        assert!(req.validate().is_ok());
    }
}
