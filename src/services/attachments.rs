use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{
    Failure, ObjectStore, Outcome, ServiceResult, access, settle, storage_call,
};
use crate::{
    config::StorageConfig,
    db::{DbPool, UnitOfWork},
    models::{Attachment, UploadFile},
    observability::metrics,
};

/// Attachment lifecycle across the relational store and the object store.
///
/// Blobs are written (or deleted) before the matching row is staged. A failed
/// transaction therefore never leaves a row without a blob, but may leave a
/// blob without a row: uploads that roll back orphan their blobs, and removals
/// that roll back have already deleted theirs.
///
/// Mutating operations take a transaction scope. `None` opens a transaction
/// owned by the call and commits or rolls it back before returning. `Some`
/// joins the caller's unit of work; only writes are staged and the caller
/// decides when to commit.
#[derive(Clone)]
pub struct AttachmentService {
    db: DbPool,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    presign_ttl: Duration,
    cancel: CancellationToken,
}

impl AttachmentService {
    pub fn new(db: DbPool, store: Arc<dyn ObjectStore>, config: &StorageConfig) -> Self {
        Self {
            db,
            store,
            bucket: config.bucket.clone(),
            presign_ttl: Duration::from_secs(config.presign_ttl_secs),
            cancel: CancellationToken::new(),
        }
    }

    /// Observe `cancel` at every database and storage await.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store `files` for a meeting and record one attachment row per file.
    ///
    /// Only participants (including the organizer) may upload.
    #[instrument(
        skip(self, scope, files),
        fields(files = files.len(), joined = scope.is_some(), backend = self.store.backend_name())
    )]
    pub async fn upload(
        &self,
        scope: Option<&mut UnitOfWork>,
        meeting_id: Uuid,
        files: Vec<UploadFile>,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<Vec<Attachment>>> {
        match scope {
            Some(uow) => self.upload_in(uow, meeting_id, files, user_id).await,
            None => {
                let mut uow = self.db.unit_of_work(self.cancel.clone());
                uow.begin_transaction().await?;
                let result = self.upload_in(&mut uow, meeting_id, files, user_id).await;
                settle(&mut uow, result).await
            }
        }
    }

    async fn upload_in(
        &self,
        uow: &mut UnitOfWork,
        meeting_id: Uuid,
        files: Vec<UploadFile>,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<Vec<Attachment>>> {
        let Some(meeting) = uow.meetings().get(meeting_id).await? else {
            return Ok(Err(Failure::MeetingNotFound));
        };
        if !access::is_participant(uow, &meeting, user_id).await? {
            return Ok(Err(Failure::NotParticipant));
        }

        let mut uploaded = Vec::with_capacity(files.len());
        let mut total_bytes: u64 = 0;

        for file in files {
            let object_key = Attachment::object_key_for(meeting_id, &file.file_name);
            let size = file.content.len();

            storage_call(
                &self.cancel,
                self.store
                    .put(&self.bucket, &object_key, file.content, &file.content_type),
            )
            .await?;

            let attachment = Attachment {
                id: Uuid::new_v4(),
                meeting_id,
                file_name: file.file_name,
                content_type: file.content_type,
                size_bytes: size as i64,
                object_key,
                uploaded_by: user_id,
                uploaded_at: Utc::now(),
            };
            debug!(attachment_id = %attachment.id, key = %attachment.object_key, size, "Blob stored");

            uow.attachments().add(attachment.clone());
            total_bytes += size as u64;
            uploaded.push(attachment);
        }

        metrics::record_attachment_upload(
            self.store.backend_name(),
            uploaded.len() as u64,
            total_bytes,
        );
        info!(count = uploaded.len(), total_bytes, "Attachments staged");
        Ok(Ok(uploaded))
    }

    /// Delete an attachment's blob, then its row.
    ///
    /// Allowed for the meeting's organizer and the original uploader.
    #[instrument(skip(self, scope), fields(joined = scope.is_some()))]
    pub async fn remove(
        &self,
        scope: Option<&mut UnitOfWork>,
        meeting_id: Uuid,
        file_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<()>> {
        match scope {
            Some(uow) => self.remove_in(uow, meeting_id, file_id, user_id).await,
            None => {
                let mut uow = self.db.unit_of_work(self.cancel.clone());
                uow.begin_transaction().await?;
                let result = self.remove_in(&mut uow, meeting_id, file_id, user_id).await;
                settle(&mut uow, result).await
            }
        }
    }

    async fn remove_in(
        &self,
        uow: &mut UnitOfWork,
        meeting_id: Uuid,
        file_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<()>> {
        let Some(found) = uow
            .attachments()
            .find_with_organizer(meeting_id, file_id)
            .await?
        else {
            return Ok(Err(Failure::AttachmentNotFound));
        };

        if !access::can_remove_attachment(&found.attachment, found.organizer_id, user_id) {
            return Ok(Err(Failure::NotAuthorized));
        }

        storage_call(
            &self.cancel,
            self.store.delete(&self.bucket, &found.attachment.object_key),
        )
        .await?;
        uow.attachments().remove(file_id);

        metrics::record_attachment_removal(self.store.backend_name());
        debug!(key = %found.attachment.object_key, "Blob deleted; row removal staged");
        Ok(Ok(()))
    }

    /// Attachments of a meeting, visible to its participants.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        meeting_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<Vec<Attachment>>> {
        let mut uow = self.db.unit_of_work(self.cancel.clone());
        let Some(meeting) = uow.meetings().get(meeting_id).await? else {
            return Ok(Err(Failure::MeetingNotFound));
        };
        if !access::is_participant(&mut uow, &meeting, user_id).await? {
            return Ok(Err(Failure::NotParticipant));
        }
        Ok(Ok(uow.attachments().list(meeting_id).await?))
    }

    /// Time-limited download link for an attachment, for participants only.
    #[instrument(skip(self))]
    pub async fn download_url(
        &self,
        meeting_id: Uuid,
        file_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<Outcome<String>> {
        let mut uow = self.db.unit_of_work(self.cancel.clone());
        let Some(meeting) = uow.meetings().get(meeting_id).await? else {
            return Ok(Err(Failure::MeetingNotFound));
        };
        if !access::is_participant(&mut uow, &meeting, user_id).await? {
            return Ok(Err(Failure::NotParticipant));
        }
        let Some(found) = uow
            .attachments()
            .find_with_organizer(meeting_id, file_id)
            .await?
        else {
            return Ok(Err(Failure::AttachmentNotFound));
        };

        let url = storage_call(
            &self.cancel,
            self.store
                .presign_get(&self.bucket, &found.attachment.object_key, self.presign_ttl),
        )
        .await?;
        Ok(Ok(url))
    }
}
