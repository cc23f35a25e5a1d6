use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role a user holds within a single meeting.
///
/// Stored as free text (`"Organizer"` / `"Participant"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantRole {
    Organizer,
    Participant,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organizer => "Organizer",
            Self::Participant => "Participant",
        }
    }
}

impl FromStr for ParticipantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Organizer" => Ok(Self::Organizer),
            "Participant" => Ok(Self::Participant),
            other => Err(format!("Unknown participant role: {}", other)),
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub meeting_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub added_at: DateTime<Utc>,
}

/// Result of adding someone to a meeting. Adding an existing member is a
/// successful no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantChange {
    Added(Participant),
    AlreadyParticipant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(
            "Organizer".parse::<ParticipantRole>().unwrap(),
            ParticipantRole::Organizer
        );
        assert_eq!(
            "Participant".parse::<ParticipantRole>().unwrap(),
            ParticipantRole::Participant
        );
        assert!("organizer".parse::<ParticipantRole>().is_err());
    }
}
