//! # Broadcast Event Models
//!
//! Shapes published by the companion API when a record is created, updated,
//! or deleted. Every type ignores unknown fields, and everything except the
//! identifying fields is optional so partial updates still parse.

use serde::{Deserialize, Serialize};

/// Topic prefix for feedback events.
pub const FEEDBACK: &str = "feedback";
/// Topic prefix for media events.
pub const MEDIA: &str = "media";

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudAction {
    /// A record was created.
    Create,
    /// A record was updated.
    Update,
    /// A record was deleted.
    Delete,
}

impl CrudAction {
    /// Lowercase token used in topic names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// The topics the companion API publishes for one change:
/// `{resource}.{action}` followed by `{resource}.{action}.{id}`.
pub fn crud_topics(resource: &str, action: CrudAction, id: &str) -> [String; 2] {
    let base = format!("{}.{}", resource, action.as_str());
    let scoped = format!("{base}.{id}");
    [base, scoped]
}

/// A user feedback entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Feedback {
    /// Record id; absent on payloads built before persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Submitter email.
    pub email: String,
    /// Free-text body.
    #[serde(default)]
    pub description: String,
    /// `general`, `bug`, or `feature`.
    #[serde(default)]
    pub feedback_type: String,
    /// Attached media id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    /// Attached media, when the publisher embeds it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    /// RFC 3339 creation time.
    #[serde(default, rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// RFC 3339 update time.
    #[serde(default, rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// An uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Media {
    /// Record id.
    pub id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_size: i64,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub storage_key: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub key: String,
    /// Short-lived download link; empty when the publisher could not presign.
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub bucket_name: String,
    /// Upload status such as `pending`.
    #[serde(default)]
    pub status: String,
    /// Upload progress.
    #[serde(default)]
    pub progress: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Generic wrapper some publishers put around a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Event id.
    pub id: String,
    /// Publish time, RFC 3339.
    pub timestamp: String,
    /// The record itself.
    pub data: T,
}

impl<T> Envelope<T> {
    /// Wraps `data` with a fresh timestamp.
    pub fn now(id: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_feedback() {
        let fb: Feedback = serde_json::from_str(r#"{"id":"42","email":"a@b.com"}"#).unwrap();
        assert_eq!(fb.id.as_deref(), Some("42"));
        assert_eq!(fb.email, "a@b.com");
        assert!(fb.description.is_empty());
    }

    #[test]
    fn parses_full_feedback_and_ignores_extras() {
        let fb: Feedback = serde_json::from_str(
            r#"{
                "id": "7",
                "email": "x@y.z",
                "description": "page is slow",
                "feedback_type": "bug",
                "media_id": null,
                "createdAt": "2026-01-01T00:00:00Z",
                "updatedAt": "2026-01-02T00:00:00Z",
                "extra": true
            }"#,
        )
        .unwrap();
        assert_eq!(fb.feedback_type, "bug");
        assert_eq!(fb.media_id, None);
        assert_eq!(fb.updated_at.as_deref(), Some("2026-01-02T00:00:00Z"));
    }

    #[test]
    fn feedback_without_email_is_rejected() {
        assert!(serde_json::from_str::<Feedback>(r#"{"id":"1"}"#).is_err());
    }

    #[test]
    fn envelope_wraps_media() {
        let env: Envelope<Media> = serde_json::from_str(
            r#"{"id":"e1","timestamp":"2026-01-01T00:00:00Z","data":{"id":"m1","file_name":"a.png","progress":100}}"#,
        )
        .unwrap();
        assert_eq!(env.data.file_name, "a.png");
        assert_eq!(env.data.progress, 100);
    }

    #[test]
    fn builds_crud_topics() {
        let [base, scoped] = crud_topics(FEEDBACK, CrudAction::Create, "42");
        assert_eq!(base, "feedback.create");
        assert_eq!(scoped, "feedback.create.42");
    }
}
