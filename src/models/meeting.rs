use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Attachment, Participant};

/// Lifecycle state of a meeting row.
///
/// `Active -> Canceled` is organizer-triggered and one-way. A canceled meeting
/// is purged by the retention job once it is older than the threshold; purged
/// meetings have no row, so that state is never observed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingState {
    Active,
    Canceled,
}

impl fmt::Display for MeetingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub organizer_id: Uuid,
    pub is_canceled: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Meeting {
    pub fn state(&self) -> MeetingState {
        if self.is_canceled {
            MeetingState::Canceled
        } else {
            MeetingState::Active
        }
    }

    /// Mark the meeting canceled. Calling this again re-stamps `canceled_at`.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.is_canceled = true;
        self.canceled_at = Some(now);
    }

    /// Apply an update in place. Absent fields are left unchanged.
    pub fn apply(&mut self, update: UpdateMeeting) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(start_at) = update.start_at {
            self.start_at = start_at.with_timezone(&Utc);
        }
        if let Some(end_at) = update.end_at {
            self.end_at = end_at.with_timezone(&Utc);
        }
    }
}

/// Input for creating a meeting.
///
/// Timestamps may carry any offset; they are stored normalized to UTC.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMeeting {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_at: DateTime<FixedOffset>,
    pub end_at: DateTime<FixedOffset>,
    /// Emails of users to invite. Unknown addresses are skipped and duplicates
    /// are collapsed case-insensitively.
    #[serde(default)]
    pub participant_emails: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMeeting {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_at: Option<DateTime<FixedOffset>>,
    pub end_at: Option<DateTime<FixedOffset>>,
}

/// A meeting together with its child rows, as seen by a participant.
#[derive(Debug, Clone, Serialize)]
pub struct MeetingDetails {
    pub meeting: Meeting,
    pub participants: Vec<Participant>,
    pub attachments: Vec<Attachment>,
}

/// A canceled meeting selected for purging, with its attachments loaded.
#[derive(Debug, Clone)]
pub struct ExpiredMeeting {
    pub meeting: Meeting,
    pub attachments: Vec<Attachment>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn meeting() -> Meeting {
        let now = Utc::now();
        Meeting {
            id: Uuid::new_v4(),
            name: "Weekly sync".into(),
            description: String::new(),
            start_at: now,
            end_at: now,
            organizer_id: Uuid::new_v4(),
            is_canceled: false,
            canceled_at: None,
            created_at: now,
        }
    }

    #[test]
    fn test_cancel_restamps() {
        let mut m = meeting();
        assert_eq!(m.state(), MeetingState::Active);

        let first = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        m.cancel(first);
        assert_eq!(m.state(), MeetingState::Canceled);
        assert_eq!(m.canceled_at, Some(first));

        let second = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        m.cancel(second);
        assert_eq!(m.canceled_at, Some(second));
        assert!(m.is_canceled);
    }

    #[test]
    fn test_apply_normalizes_to_utc() {
        let mut m = meeting();
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();

        m.apply(UpdateMeeting {
            start_at: Some(local),
            ..Default::default()
        });

        assert_eq!(
            m.start_at,
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
        );
        assert_eq!(m.name, "Weekly sync");
    }
}
