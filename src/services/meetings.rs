use std::{collections::HashSet, sync::Arc};

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{Failure, Outcome, ServiceError, ServiceResult, abandon, access};
use crate::{
    db::{DbPool, UnitOfWork},
    jobs::{JobDispatcher, JobRef},
    models::{
        CreateMeeting, Meeting, MeetingDetails, Participant, ParticipantChange, ParticipantRole,
        UpdateMeeting, User, normalize_email,
    },
    observability::metrics,
};

/// How long before a meeting starts its reminder fires.
pub const REMINDER_LEAD: TimeDelta = TimeDelta::minutes(20);

fn record<T>(operation: &str, result: &ServiceResult<Outcome<T>>) {
    let outcome = match result {
        Ok(Ok(_)) => "success",
        Ok(Err(failure)) => failure.code(),
        Err(_) => "error",
    };
    metrics::record_meeting_operation(operation, outcome);
}

/// Invitee emails, normalized and deduplicated, organizer first.
fn invitee_emails(organizer_email: &str, invited: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    std::iter::once(organizer_email)
        .chain(invited.iter().map(String::as_str))
        .map(normalize_email)
        .filter(|email| !email.is_empty() && seen.insert(email.clone()))
        .collect()
}

/// Meeting lifecycle: creation, edits, cancellation and membership.
#[derive(Clone)]
pub struct MeetingService {
    db: DbPool,
    dispatcher: Arc<dyn JobDispatcher>,
    cancel: CancellationToken,
}

impl MeetingService {
    pub fn new(db: DbPool, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            db,
            dispatcher,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn unit_of_work(&self) -> UnitOfWork {
        self.db.unit_of_work(self.cancel.clone())
    }

    /// Create a meeting with its organizer and invitees in one transaction,
    /// then schedule its reminder.
    ///
    /// Invitee emails that match no user are skipped. The reminder is
    /// scheduled after commit; failing to schedule it is logged and does not
    /// fail the call, since the meeting already exists.
    #[instrument(skip(self, data), fields(name = %data.name, invited = data.participant_emails.len()))]
    pub async fn create_meeting(
        &self,
        data: CreateMeeting,
        organizer_id: Uuid,
    ) -> ServiceResult<Meeting> {
        let mut uow = self.unit_of_work();

        let organizer = match uow.users().get(organizer_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                metrics::record_meeting_operation("create", "organizer_not_found");
                return Err(ServiceError::OrganizerNotFound(organizer_id));
            }
            Err(e) => {
                metrics::record_meeting_operation("create", "error");
                return Err(e.into());
            }
        };

        uow.begin_transaction().await?;
        let meeting = match self.stage_meeting(&mut uow, data, &organizer).await {
            Ok(meeting) => meeting,
            Err(e) => {
                abandon(&mut uow, &e).await;
                metrics::record_meeting_operation("create", "error");
                return Err(e);
            }
        };
        if let Err(e) = uow.commit().await {
            metrics::record_meeting_operation("create", "error");
            return Err(e.into());
        }

        info!(meeting_id = %meeting.id, start_at = %meeting.start_at, "Meeting created");
        metrics::record_meeting_operation("create", "success");

        if let Err(e) = self.schedule_reminder(&meeting).await {
            warn!(meeting_id = %meeting.id, error = %e, "Failed to schedule meeting reminder");
        }

        Ok(meeting)
    }

    async fn stage_meeting(
        &self,
        uow: &mut UnitOfWork,
        data: CreateMeeting,
        organizer: &User,
    ) -> ServiceResult<Meeting> {
        let now = Utc::now();
        let meeting = Meeting {
            id: Uuid::new_v4(),
            name: data.name,
            description: data.description,
            start_at: data.start_at.with_timezone(&Utc),
            end_at: data.end_at.with_timezone(&Utc),
            organizer_id: organizer.id,
            is_canceled: false,
            canceled_at: None,
            created_at: now,
        };

        let emails = invitee_emails(&organizer.email, &data.participant_emails);
        let users = uow.users().find_by_emails(&emails).await?;
        if users.len() < emails.len() {
            debug!(
                requested = emails.len(),
                resolved = users.len(),
                "Skipping invitee emails with no matching user"
            );
        }

        uow.meetings().add(meeting.clone());
        uow.participants().add(Participant {
            meeting_id: meeting.id,
            user_id: organizer.id,
            role: ParticipantRole::Organizer,
            added_at: now,
        });
        for user in users.into_iter().filter(|u| u.id != organizer.id) {
            uow.participants().add(Participant {
                meeting_id: meeting.id,
                user_id: user.id,
                role: ParticipantRole::Participant,
                added_at: now,
            });
        }

        Ok(meeting)
    }

    /// Schedule the reminder for `meeting` unless its lead time has passed.
    /// Returns whether a job was scheduled.
    pub async fn schedule_reminder(&self, meeting: &Meeting) -> ServiceResult<bool> {
        let remind_at = meeting.start_at - REMINDER_LEAD;
        if remind_at <= Utc::now() {
            debug!(meeting_id = %meeting.id, "Meeting starts too soon for a reminder");
            return Ok(false);
        }

        self.dispatcher
            .schedule_at(
                JobRef::MeetingReminder {
                    meeting_id: meeting.id,
                },
                remind_at,
            )
            .await?;
        debug!(meeting_id = %meeting.id, remind_at = %remind_at, "Reminder scheduled");
        Ok(true)
    }

    /// Edit a meeting. Organizer only.
    #[instrument(skip(self, update))]
    pub async fn update_meeting(
        &self,
        meeting_id: Uuid,
        update: UpdateMeeting,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<Meeting>> {
        let result = self.try_update_meeting(meeting_id, update, user_id).await;
        record("update", &result);
        result
    }

    async fn try_update_meeting(
        &self,
        meeting_id: Uuid,
        update: UpdateMeeting,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<Meeting>> {
        let mut uow = self.unit_of_work();
        let Some(mut meeting) = uow.meetings().get(meeting_id).await? else {
            return Ok(Err(Failure::MeetingNotFound));
        };
        if !access::is_organizer(&meeting, user_id) {
            return Ok(Err(Failure::NotAuthorized));
        }

        meeting.apply(update);
        uow.meetings().update(meeting.clone());
        uow.complete().await?;
        Ok(Ok(meeting))
    }

    /// Cancel a meeting. Organizer only.
    ///
    /// Canceling again re-stamps `canceled_at`, which restarts the retention
    /// clock.
    #[instrument(skip(self))]
    pub async fn cancel_meeting(
        &self,
        meeting_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<Meeting>> {
        let result = self.try_cancel_meeting(meeting_id, user_id).await;
        record("cancel", &result);
        result
    }

    async fn try_cancel_meeting(
        &self,
        meeting_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<Meeting>> {
        let mut uow = self.unit_of_work();
        let Some(mut meeting) = uow.meetings().get(meeting_id).await? else {
            return Ok(Err(Failure::MeetingNotFound));
        };
        if !access::is_organizer(&meeting, user_id) {
            return Ok(Err(Failure::NotAuthorized));
        }

        meeting.cancel(Utc::now());
        uow.meetings().update(meeting.clone());
        uow.complete().await?;
        info!(canceled_at = ?meeting.canceled_at, "Meeting canceled");
        Ok(Ok(meeting))
    }

    /// Invite a registered user by email. Organizer only.
    #[instrument(skip(self, email))]
    pub async fn add_participant(
        &self,
        meeting_id: Uuid,
        email: &str,
        organizer_id: Uuid,
    ) -> ServiceResult<Outcome<ParticipantChange>> {
        let result = self
            .try_add_participant(meeting_id, email, organizer_id)
            .await;
        record("add_participant", &result);
        result
    }

    async fn try_add_participant(
        &self,
        meeting_id: Uuid,
        email: &str,
        organizer_id: Uuid,
    ) -> ServiceResult<Outcome<ParticipantChange>> {
        let mut uow = self.unit_of_work();
        let Some(meeting) = uow.meetings().get(meeting_id).await? else {
            return Ok(Err(Failure::MeetingNotFound));
        };
        if !access::is_organizer(&meeting, organizer_id) {
            return Ok(Err(Failure::NotAuthorized));
        }
        let Some(user) = uow.users().find_by_email(email).await? else {
            return Ok(Err(Failure::UserNotFound));
        };
        if uow.participants().exists(meeting_id, user.id).await? {
            return Ok(Ok(ParticipantChange::AlreadyParticipant));
        }

        let participant = Participant {
            meeting_id,
            user_id: user.id,
            role: ParticipantRole::Participant,
            added_at: Utc::now(),
        };
        uow.participants().add(participant.clone());
        uow.complete().await?;
        Ok(Ok(ParticipantChange::Added(participant)))
    }

    /// Remove a participant. Organizer only; the organizer's own row is never
    /// removable.
    #[instrument(skip(self))]
    pub async fn remove_participant(
        &self,
        meeting_id: Uuid,
        user_id: Uuid,
        organizer_id: Uuid,
    ) -> ServiceResult<Outcome<()>> {
        let result = self
            .try_remove_participant(meeting_id, user_id, organizer_id)
            .await;
        record("remove_participant", &result);
        result
    }

    async fn try_remove_participant(
        &self,
        meeting_id: Uuid,
        user_id: Uuid,
        organizer_id: Uuid,
    ) -> ServiceResult<Outcome<()>> {
        let mut uow = self.unit_of_work();
        let Some(meeting) = uow.meetings().get(meeting_id).await? else {
            return Ok(Err(Failure::MeetingNotFound));
        };
        if access::is_organizer(&meeting, user_id) {
            return Ok(Err(Failure::OrganizerCannotBeRemoved));
        }
        if !access::is_organizer(&meeting, organizer_id) {
            return Ok(Err(Failure::NotAuthorized));
        }
        if !uow.participants().exists(meeting_id, user_id).await? {
            return Ok(Err(Failure::NotInMeeting));
        }

        uow.participants().remove(meeting_id, user_id);
        uow.complete().await?;
        Ok(Ok(()))
    }

    /// A meeting with its participants and attachments, for participants only.
    #[instrument(skip(self))]
    pub async fn get_meeting(
        &self,
        meeting_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<MeetingDetails>> {
        let mut uow = self.unit_of_work();
        let Some(meeting) = uow.meetings().get(meeting_id).await? else {
            return Ok(Err(Failure::MeetingNotFound));
        };
        if !access::is_participant(&mut uow, &meeting, user_id).await? {
            return Ok(Err(Failure::NotParticipant));
        }

        let participants = uow.participants().list(meeting_id).await?;
        let attachments = uow.attachments().list(meeting_id).await?;
        Ok(Ok(MeetingDetails {
            meeting,
            participants,
            attachments,
        }))
    }

    /// Meetings `user_id` belongs to, soonest first. Includes canceled
    /// meetings that have not been purged yet.
    #[instrument(skip(self))]
    pub async fn list_meetings_for_user(&self, user_id: Uuid) -> ServiceResult<Vec<Meeting>> {
        let mut uow = self.unit_of_work();
        Ok(uow.meetings().list_for_user(user_id).await?)
    }
}
