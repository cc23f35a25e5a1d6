use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata row describing a file attached to a meeting.
///
/// The bytes live in the object store under `object_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub meeting_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub object_key: String,
    pub uploaded_by: Uuid,
    pub uploaded_at: DateTime<Utc>,
}

impl Attachment {
    /// Build the object-store key for a new upload:
    /// `{meeting_id}/{random_id}-{file_name}`.
    ///
    /// Path separators in the file name are replaced so the key keeps exactly
    /// one `/` after the meeting prefix.
    pub fn object_key_for(meeting_id: Uuid, file_name: &str) -> String {
        let safe_name: String = file_name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!("{}/{}-{}", meeting_id, Uuid::new_v4().simple(), safe_name)
    }
}

/// An attachment joined with the organizer of its meeting.
#[derive(Debug, Clone)]
pub struct AttachmentWithOrganizer {
    pub attachment: Attachment,
    pub organizer_id: Uuid,
}

/// A file handed to the upload operation.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub content: Bytes,
}

impl UploadFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_layout() {
        let meeting_id = Uuid::new_v4();
        let key = Attachment::object_key_for(meeting_id, "notes.pdf");

        let (prefix, rest) = key.split_once('/').unwrap();
        assert_eq!(prefix, meeting_id.to_string());
        let (random, name) = rest.split_once('-').unwrap();
        assert_eq!(random.len(), 32);
        assert_eq!(name, "notes.pdf");
    }

    #[test]
    fn test_object_key_is_unique_per_upload() {
        let meeting_id = Uuid::new_v4();
        let a = Attachment::object_key_for(meeting_id, "a.txt");
        let b = Attachment::object_key_for(meeting_id, "a.txt");
        assert_ne!(a, b);
    }

    #[test]
    fn test_object_key_strips_separators() {
        let meeting_id = Uuid::new_v4();
        let key = Attachment::object_key_for(meeting_id, "../etc/passwd");
        assert_eq!(key.matches('/').count(), 1);
        assert!(key.ends_with("-.._etc_passwd"));
    }
}
