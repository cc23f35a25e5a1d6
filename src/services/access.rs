//! Authorization predicates for meeting resources.
//!
//! Every lifecycle operation asks these instead of comparing ids inline.

use uuid::Uuid;

use crate::{
    db::{DbResult, UnitOfWork},
    models::{Attachment, Meeting},
};

pub fn is_organizer(meeting: &Meeting, user_id: Uuid) -> bool {
    meeting.organizer_id == user_id
}

/// Organizers always count as participants, even if their row is missing.
pub async fn is_participant(
    uow: &mut UnitOfWork,
    meeting: &Meeting,
    user_id: Uuid,
) -> DbResult<bool> {
    if is_organizer(meeting, user_id) {
        return Ok(true);
    }
    uow.participants().exists(meeting.id, user_id).await
}

/// The meeting's organizer or the attachment's original uploader.
pub fn can_remove_attachment(attachment: &Attachment, organizer_id: Uuid, user_id: Uuid) -> bool {
    organizer_id == user_id || attachment.uploaded_by == user_id
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn attachment(uploaded_by: Uuid) -> Attachment {
        let meeting_id = Uuid::new_v4();
        Attachment {
            id: Uuid::new_v4(),
            meeting_id,
            file_name: "a.txt".into(),
            content_type: "text/plain".into(),
            size_bytes: 1,
            object_key: Attachment::object_key_for(meeting_id, "a.txt"),
            uploaded_by,
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_can_remove_attachment() {
        let organizer = Uuid::new_v4();
        let uploader = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let file = attachment(uploader);

        assert!(can_remove_attachment(&file, organizer, organizer));
        assert!(can_remove_attachment(&file, organizer, uploader));
        assert!(!can_remove_attachment(&file, organizer, stranger));
    }
}
