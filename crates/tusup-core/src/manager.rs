//! Session manager
//!
//! Owns the registry of live sessions and serializes commands per upload
//! id. At most one session runs per id; distinct ids transfer in parallel
//! up to the configured concurrency bound.

use crate::error::TusError;
use crate::protocol::ProtocolDriver;
use crate::session::UploadSession;
use crate::sink::EventSink;
use crate::store::UploadStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tusup_types::{TusSettings, UploadRecord, UploadStatus};

/// Control surface for one spawned session. The flags are shared with the
/// session task, which checks them at chunk boundaries.
struct SessionHandle {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// What `create_or_resume` did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A session was spawned (new upload, resume, or fresh re-upload).
    Started,
    /// A session for this id is already transferring; nothing changed.
    InProgress,
}

pub struct UploadManager {
    store: UploadStore,
    protocol: Arc<dyn ProtocolDriver>,
    sink: Arc<dyn EventSink>,
    settings: TusSettings,
    active: Arc<Mutex<HashMap<String, SessionHandle>>>,
    transfer_permits: Arc<Semaphore>,
}

impl UploadManager {
    pub fn new(
        store: UploadStore,
        protocol: Arc<dyn ProtocolDriver>,
        sink: Arc<dyn EventSink>,
        settings: TusSettings,
    ) -> Self {
        let transfer_permits = Arc::new(Semaphore::new(settings.max_concurrent_uploads));
        Self {
            store,
            protocol,
            sink,
            settings,
            active: Arc::new(Mutex::new(HashMap::new())),
            transfer_permits,
        }
    }

    /// Start or resume the upload for `request.id`.
    ///
    /// A live transferring session makes this a no-op. Otherwise the request
    /// is merged into the stored record: headers always refresh, metadata
    /// only while no remote resource exists, and a record that already
    /// finished starts over as a fresh upload.
    pub async fn create_or_resume(&self, request: UploadRecord) -> Result<StartOutcome, TusError> {
        let id = request.id.clone();

        if let Some(handle) = self.take_settled_handle(&id).await? {
            // Still transferring.
            self.active.lock().await.insert(id, handle);
            return Ok(StartOutcome::InProgress);
        }

        let record = match self.store.get(&id).await? {
            Some(stored) if !stored.status.is_terminal() => merge_request(stored, request),
            Some(_) => {
                // Completed earlier and kept around. Re-upload from scratch.
                debug!(upload_id = %id, "restarting a finished upload");
                request
            }
            None => request,
        };
        let reconcile = record.resource_url.is_some();

        self.store.put(&record).await?;
        self.spawn(record, reconcile).await;
        Ok(StartOutcome::Started)
    }

    /// Retry a paused or failed upload, optionally with refreshed headers.
    /// Always reconciles against the server before transferring again.
    pub async fn retry(
        &self,
        id: &str,
        headers: HashMap<String, String>,
    ) -> Result<(), TusError> {
        if let Some(handle) = self.take_settled_handle(id).await? {
            self.active.lock().await.insert(id.to_string(), handle);
            return Err(TusError::InvalidOperation(format!(
                "upload {id} is already running"
            )));
        }

        let mut record = match self.store.get(id).await? {
            Some(record) => record,
            None => return Err(TusError::UnknownId(id.to_string())),
        };
        if !record.status.is_retryable() {
            return Err(TusError::UnknownId(id.to_string()));
        }

        record.headers.extend(headers);
        record.error = None;
        self.store.put(&record).await?;
        self.spawn(record, true).await;
        Ok(())
    }

    /// Request a pause. A live session stops at the next chunk boundary; a
    /// record left mid-flight by a dead process is parked directly.
    pub async fn pause(&self, id: &str) -> Result<(), TusError> {
        if let Some(handle) = self.active.lock().await.get(id) {
            handle.paused.store(true, Ordering::Release);
            info!(upload_id = %id, "pause requested");
            return Ok(());
        }

        let record = match self.store.get(id).await? {
            Some(record) => record,
            None => return Err(TusError::UnknownId(id.to_string())),
        };
        match record.status {
            UploadStatus::Creating | UploadStatus::Transferring => {
                self.store
                    .update_status(id, UploadStatus::Paused, None)
                    .await?;
                self.sink.status_changed(id, UploadStatus::Paused, None);
            }
            _ => {}
        }
        Ok(())
    }

    /// Cancel the upload and forget it. The live session, if any, winds
    /// down at its next chunk boundary; the record is gone either way.
    pub async fn cancel_and_remove(&self, id: &str) -> Result<(), TusError> {
        let handle = self.active.lock().await.remove(id);
        let record = self.store.get(id).await?;

        if handle.is_none() && record.is_none() {
            return Err(TusError::UnknownId(id.to_string()));
        }

        if let Some(handle) = handle {
            handle.cancelled.store(true, Ordering::Release);
        }
        if record.is_some() {
            self.store.delete(id).await?;
        }
        info!(upload_id = %id, "upload canceled and removed");
        self.sink.status_changed(id, UploadStatus::Canceled, None);
        Ok(())
    }

    /// Ids with a session currently running.
    pub async fn list_active(&self) -> Vec<String> {
        self.active
            .lock()
            .await
            .iter()
            .filter(|(_, handle)| !handle.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.active
            .lock()
            .await
            .get(id)
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    /// Startup reconciliation. Records a previous process left mid-flight
    /// are synced with the server's confirmed offset and parked `Paused`,
    /// ready for an explicit resume.
    pub async fn restore(&self) -> Result<(), TusError> {
        for record in self.store.list_all().await? {
            if !matches!(
                record.status,
                UploadStatus::Creating | UploadStatus::Transferring
            ) {
                continue;
            }

            if let Some(resource_url) = &record.resource_url {
                match self.protocol.query_offset(resource_url, &record.headers).await {
                    Ok(server_offset) => {
                        let adopted = server_offset.min(record.file_size);
                        self.store.update_offset(&record.id, adopted).await?;
                    }
                    Err(TusError::ResourceGone) => {
                        let mut fresh = record.clone();
                        fresh.resource_url = None;
                        fresh.offset = 0;
                        self.store.put(&fresh).await?;
                    }
                    Err(e) => {
                        warn!(upload_id = %record.id, error = %e, "startup reconciliation failed");
                    }
                }
            }

            self.store
                .update_status(&record.id, UploadStatus::Paused, None)
                .await?;
            self.sink
                .status_changed(&record.id, UploadStatus::Paused, None);
            info!(upload_id = %record.id, "parked in-flight upload");
        }
        Ok(())
    }

    /// Remove this id's handle from the registry unless its session is
    /// still actively transferring, in which case the handle is returned
    /// to the caller untouched. A session that observed a pause or cancel
    /// flag is awaited so its final status write lands before the caller
    /// reads the record.
    async fn take_settled_handle(&self, id: &str) -> Result<Option<SessionHandle>, TusError> {
        let handle = match self.active.lock().await.remove(id) {
            Some(handle) => handle,
            None => return Ok(None),
        };

        let settling = handle.task.is_finished()
            || handle.paused.load(Ordering::Acquire)
            || handle.cancelled.load(Ordering::Acquire);
        if !settling {
            return Ok(Some(handle));
        }

        if let Err(e) = handle.task.await {
            warn!(upload_id = %id, error = %e, "session task aborted");
        }
        Ok(None)
    }

    async fn spawn(&self, record: UploadRecord, reconcile: bool) {
        let id = record.id.clone();
        let paused = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));

        let session = UploadSession::new(
            record,
            self.store.clone(),
            self.protocol.clone(),
            self.sink.clone(),
            self.settings.clone(),
            paused.clone(),
            cancelled.clone(),
            reconcile,
        );

        let permits = self.transfer_permits.clone();
        let active = self.active.clone();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            // Closed only on shutdown; nothing left to run then.
            if let Ok(_permit) = permits.acquire_owned().await {
                session.run().await;
            }
            active.lock().await.remove(&task_id);
        });

        self.active.lock().await.insert(
            id,
            SessionHandle {
                paused,
                cancelled,
                task,
            },
        );
    }
}

/// Fold a new request into the record we already hold for this id. The
/// stored transfer state (resource url, offset, size) is authoritative;
/// headers refresh freely, metadata only while no remote resource exists.
fn merge_request(mut stored: UploadRecord, request: UploadRecord) -> UploadRecord {
    stored.headers.extend(request.headers);
    if stored.resource_url.is_none() {
        stored.metadata = request.metadata;
        stored.file_path = request.file_path;
        stored.file_size = request.file_size;
        stored.file_type = request.file_type;
    }
    stored.error = None;
    stored
}
