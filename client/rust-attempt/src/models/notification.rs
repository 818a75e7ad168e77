use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification pushed by the LMS over the publish/subscribe channel.
///
/// Payload shapes vary by topic, so every field is optional and unknown
/// fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    /// Interprets a raw channel payload; `None` for payloads that are not objects.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        if !payload.is_object() {
            return None;
        }
        serde_json::from_value(payload.clone()).ok()
    }

    pub fn summary(&self) -> String {
        let kind = self.kind.as_deref().unwrap_or("notification");
        match (&self.title, &self.message) {
            (Some(title), Some(message)) => format!("[{}] {}: {}", kind, title, message),
            (Some(title), None) => format!("[{}] {}", kind, title),
            (None, Some(message)) => format!("[{}] {}", kind, message),
            (None, None) => format!("[{}]", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_partial_payload() {
        let payload = json!({
            "type": "ENROLLMENT",
            "title": "Enrolled",
            "message": "You joined Rust 101",
            "courseId": 42
        });

        let notification = Notification::from_payload(&payload).unwrap();
        assert_eq!(
            notification.summary(),
            "[ENROLLMENT] Enrolled: You joined Rust 101"
        );
        assert!(!notification.read);
    }

    #[test]
    fn rejects_non_object_payload() {
        assert!(Notification::from_payload(&json!("ping")).is_none());
        assert!(Notification::from_payload(&json!([1, 2])).is_none());
    }
}
