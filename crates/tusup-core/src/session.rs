//! Upload session state machine
//!
//! One session per active upload id. A session owns the chunk reader and
//! the in-flight network operation, sequences the protocol exchanges,
//! persists every confirmed offset, and reports each terminal outcome
//! exactly once.
//!
//! States: New -> Creating -> Transferring <-> Paused, Transferring ->
//! Completed, {Creating, Transferring} -> Failed, any non-terminal ->
//! Canceled. Pause and cancel are honored only at chunk boundaries so the
//! server and the local record never diverge mid-chunk.

use crate::chunk_reader::ChunkReader;
use crate::error::TusError;
use crate::protocol::ProtocolDriver;
use crate::sink::EventSink;
use crate::store::UploadStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tusup_types::{TusSettings, UploadRecord, UploadStatus};

/// How a session run ended. `Failed` is reported through `run`'s error
/// handling instead.
#[derive(Debug, PartialEq, Eq)]
enum SessionOutcome {
    Completed,
    Paused,
    AuthPaused,
    Canceled,
}

pub struct UploadSession {
    record: UploadRecord,
    store: UploadStore,
    protocol: Arc<dyn ProtocolDriver>,
    sink: Arc<dyn EventSink>,
    settings: TusSettings,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    /// Re-query the server offset before transferring. Set on every resume
    /// and retry path, and at startup after a process restart.
    reconcile: bool,
}

impl UploadSession {
    pub fn new(
        record: UploadRecord,
        store: UploadStore,
        protocol: Arc<dyn ProtocolDriver>,
        sink: Arc<dyn EventSink>,
        settings: TusSettings,
        paused: Arc<AtomicBool>,
        cancelled: Arc<AtomicBool>,
        reconcile: bool,
    ) -> Self {
        Self {
            record,
            store,
            protocol,
            sink,
            settings,
            paused,
            cancelled,
            reconcile,
        }
    }

    /// Drive the session to a resting state. Protocol errors are classified
    /// here; anything fatal becomes a `Failed` record plus one failure
    /// event, never a silently dropped error.
    pub async fn run(mut self) {
        let id = self.record.id.clone();

        match self.drive().await {
            Ok(outcome) => {
                info!(upload_id = %id, ?outcome, "upload session settled");
            }
            Err(e) => {
                error!(upload_id = %id, error = %e, "upload session failed");
                let message = e.to_string();
                self.record.status = UploadStatus::Failed;
                self.record.error = Some(message.clone());
                if let Err(store_err) = self
                    .store
                    .update_status(&id, UploadStatus::Failed, Some(message.clone()))
                    .await
                {
                    error!(upload_id = %id, error = %store_err, "failed to persist failure");
                }
                self.sink.failed(&id, &message);
                self.sink
                    .status_changed(&id, UploadStatus::Failed, Some(&message));
            }
        }
    }

    async fn drive(&mut self) -> Result<SessionOutcome, TusError> {
        if self.cancelled.load(Ordering::Acquire) {
            return self.enter_canceled().await;
        }
        if self.paused.load(Ordering::Acquire) {
            return self.enter_paused().await;
        }

        // The reader is opened before any network traffic: a vanished file
        // is fatal and there is no point creating a resource for it.
        let mut reader = ChunkReader::open(&self.record.file_path).await?;
        if reader.size() != self.record.file_size {
            return Err(TusError::FileUnavailable(format!(
                "{}: size changed from {} to {} since enqueue",
                self.record.file_path.display(),
                self.record.file_size,
                reader.size()
            )));
        }

        // Reconcile against the server before resuming a known resource.
        if self.reconcile && self.record.resource_url.is_some() {
            match self.reconcile_offset().await {
                Ok(()) => {}
                Err(TusError::ResourceGone) => {
                    info!(upload_id = %self.record.id, "remote resource gone, starting fresh");
                    self.record.resource_url = None;
                    self.record.offset = 0;
                    self.store.put(&self.record).await?;
                }
                Err(TusError::AuthRequired) => return self.enter_auth_paused(None).await,
                Err(e) => return Err(e),
            }
        }

        if self.record.resource_url.is_none() {
            self.set_status(UploadStatus::Creating).await?;
            match self.create_with_retry().await {
                Ok(url) => {
                    // Set exactly once; never touched again for this record.
                    self.record.resource_url = Some(url);
                    self.record.offset = 0;
                    self.store.put(&self.record).await?;
                }
                Err(TusError::AuthRequired) => return self.enter_auth_paused(None).await,
                Err(e) => return Err(e),
            }
        }

        let resource_url = match self.record.resource_url.clone() {
            Some(url) => url,
            None => {
                return Err(TusError::InvalidOperation(
                    "transfer started without a resource location".into(),
                ))
            }
        };

        self.set_status(UploadStatus::Transferring).await?;

        let id = self.record.id.clone();
        let mut net_attempts: u32 = 0;
        let mut mismatch_attempts: u32 = 0;

        while self.record.offset < self.record.file_size {
            if self.cancelled.load(Ordering::Acquire) {
                return self.enter_canceled().await;
            }
            if self.paused.load(Ordering::Acquire) {
                return self.enter_paused().await;
            }

            let chunk = match reader
                .read_at(self.record.offset, self.settings.chunk_size)
                .await?
            {
                Some(chunk) => chunk,
                None => break,
            };
            let chunk_len = chunk.len() as u64;
            let offset = self.record.offset;

            match self
                .protocol
                .append_chunk(&resource_url, offset, chunk, &self.record.headers)
                .await
            {
                Ok(new_offset) if new_offset == offset + chunk_len => {
                    net_attempts = 0;
                    mismatch_attempts = 0;
                    // Only a server-acknowledged exact byte count advances
                    // the record.
                    self.record.offset = new_offset;
                    self.store.update_offset(&id, new_offset).await?;
                    self.sink.progress(&id, new_offset, self.record.file_size);
                }
                Ok(unexpected) => {
                    warn!(
                        upload_id = %id,
                        expected = offset + chunk_len,
                        got = unexpected,
                        "server acknowledged an unexpected offset"
                    );
                    mismatch_attempts += 1;
                    if mismatch_attempts > self.settings.max_retries {
                        return Err(TusError::OffsetMismatch { local: offset });
                    }
                    self.handle_mismatch().await?;
                }
                Err(TusError::OffsetMismatch { .. }) => {
                    mismatch_attempts += 1;
                    if mismatch_attempts > self.settings.max_retries {
                        return Err(TusError::OffsetMismatch { local: offset });
                    }
                    match self.handle_mismatch().await {
                        Ok(()) => {}
                        Err(TusError::AuthRequired) => {
                            return self.enter_auth_paused(None).await
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(TusError::AuthRequired) => return self.enter_auth_paused(None).await,
                Err(e) if e.is_retryable() => {
                    net_attempts += 1;
                    if net_attempts > self.settings.max_retries {
                        return Err(e);
                    }
                    warn!(
                        upload_id = %id,
                        attempt = net_attempts,
                        error = %e,
                        "transient append failure, backing off"
                    );
                    tokio::time::sleep(self.backoff(net_attempts)).await;
                }
                Err(e) => return Err(e),
            }
        }

        self.record.status = UploadStatus::Completed;
        self.record.completed_at = Some(chrono::Utc::now());
        self.store
            .update_status(&id, UploadStatus::Completed, None)
            .await?;
        self.sink.completed(&id, &resource_url);
        self.sink.status_changed(&id, UploadStatus::Completed, None);
        Ok(SessionOutcome::Completed)
    }

    /// Re-query the server's confirmed offset and adopt it.
    async fn reconcile_offset(&mut self) -> Result<(), TusError> {
        let resource_url = match self.record.resource_url.clone() {
            Some(url) => url,
            None => return Ok(()),
        };

        let server_offset = self.query_with_retry(&resource_url).await?;
        let adopted = server_offset.min(self.record.file_size);
        if adopted != self.record.offset {
            info!(
                upload_id = %self.record.id,
                local = self.record.offset,
                server = server_offset,
                "reconciled offset with server"
            );
        }
        self.record.offset = adopted;
        self.store.update_offset(&self.record.id, adopted).await?;
        Ok(())
    }

    /// After a rejected append the server offset is authoritative. No
    /// progress event here; the next acknowledged append reports it.
    async fn handle_mismatch(&mut self) -> Result<(), TusError> {
        self.reconcile_offset().await
    }

    async fn create_with_retry(&self) -> Result<String, TusError> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .protocol
                .create_resource(
                    self.record.file_size,
                    &self.record.metadata,
                    &self.record.headers,
                )
                .await
            {
                Ok(url) => return Ok(url),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    warn!(upload_id = %self.record.id, attempt, error = %e, "creation failed, retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn query_with_retry(&self, resource_url: &str) -> Result<u64, TusError> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .protocol
                .query_offset(resource_url, &self.record.headers)
                .await
            {
                Ok(offset) => return Ok(offset),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    warn!(upload_id = %self.record.id, attempt, error = %e, "offset query failed, retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(5);
        Duration::from_millis(self.settings.retry_delay_ms << shift)
    }

    async fn set_status(&mut self, status: UploadStatus) -> Result<(), TusError> {
        self.record.status = status;
        self.store
            .update_status(&self.record.id, status, None)
            .await?;
        self.sink.status_changed(&self.record.id, status, None);
        Ok(())
    }

    async fn enter_paused(&mut self) -> Result<SessionOutcome, TusError> {
        self.set_status(UploadStatus::Paused).await?;
        Ok(SessionOutcome::Paused)
    }

    async fn enter_auth_paused(&mut self, error: Option<&str>) -> Result<SessionOutcome, TusError> {
        self.record.status = UploadStatus::Paused;
        self.store
            .update_status(&self.record.id, UploadStatus::Paused, None)
            .await?;
        self.sink.auth_required(&self.record.id, error);
        self.sink
            .status_changed(&self.record.id, UploadStatus::Paused, error);
        Ok(SessionOutcome::AuthPaused)
    }

    async fn enter_canceled(&mut self) -> Result<SessionOutcome, TusError> {
        self.set_status(UploadStatus::Canceled).await?;
        Ok(SessionOutcome::Canceled)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted protocol driver and recording sink shared by session and
    //! manager tests.

    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicU64};
    use std::sync::Mutex;
    use tusup_types::UploadEvent;

    pub const MOCK_RESOURCE_URL: &str = "https://upload.test/files/mock";

    /// In-memory tus server: tracks one resource's confirmed offset and can
    /// be scripted to fail individual appends.
    #[derive(Default)]
    pub struct MockProtocol {
        offset: AtomicU64,
        pub create_count: AtomicU64,
        pub query_count: AtomicU64,
        /// Offsets of every acknowledged append, in order.
        pub append_offsets: Mutex<Vec<u64>>,
        /// Errors returned for upcoming append calls, front first. `None`
        /// entries let the call through.
        pub append_script: Mutex<VecDeque<Option<TusError>>>,
        /// Report the resource gone on the next offset query.
        pub gone_on_query: AtomicBool,
        /// Flip this flag once the append at the given offset is
        /// acknowledged, emulating a pause command landing mid-transfer.
        pub pause_after_offset: Mutex<Option<(u64, Arc<AtomicBool>)>>,
        /// Optional per-append delay, for overlapping-command tests.
        pub append_delay: Mutex<Option<Duration>>,
    }

    impl MockProtocol {
        pub fn script_append_errors(&self, errors: Vec<Option<TusError>>) {
            *self.append_script.lock().unwrap() = errors.into();
        }

        pub fn acknowledged(&self) -> Vec<u64> {
            self.append_offsets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProtocolDriver for MockProtocol {
        async fn create_resource(
            &self,
            _size: u64,
            _metadata: &HashMap<String, String>,
            _headers: &HashMap<String, String>,
        ) -> Result<String, TusError> {
            self.create_count.fetch_add(1, Ordering::SeqCst);
            self.offset.store(0, Ordering::SeqCst);
            Ok(MOCK_RESOURCE_URL.to_string())
        }

        async fn query_offset(
            &self,
            _resource_url: &str,
            _headers: &HashMap<String, String>,
        ) -> Result<u64, TusError> {
            self.query_count.fetch_add(1, Ordering::SeqCst);
            if self.gone_on_query.swap(false, Ordering::SeqCst) {
                return Err(TusError::ResourceGone);
            }
            Ok(self.offset.load(Ordering::SeqCst))
        }

        async fn append_chunk(
            &self,
            _resource_url: &str,
            offset: u64,
            chunk: Bytes,
            _headers: &HashMap<String, String>,
        ) -> Result<u64, TusError> {
            let delay = *self.append_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if let Some(scripted) = self.append_script.lock().unwrap().pop_front().flatten() {
                return Err(scripted);
            }

            let confirmed = self.offset.load(Ordering::SeqCst);
            if offset != confirmed {
                return Err(TusError::OffsetMismatch { local: offset });
            }

            let new_offset = confirmed + chunk.len() as u64;
            self.offset.store(new_offset, Ordering::SeqCst);
            self.append_offsets.lock().unwrap().push(offset);

            if let Some((trigger, flag)) = self.pause_after_offset.lock().unwrap().as_ref() {
                if *trigger == offset {
                    flag.store(true, Ordering::SeqCst);
                }
            }

            Ok(new_offset)
        }
    }

    /// Sink that records every event for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<UploadEvent>>,
    }

    impl RecordingSink {
        fn push(&self, event: UploadEvent) {
            self.events.lock().unwrap().push(event);
        }

        pub fn progress_offsets(&self) -> Vec<u64> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    UploadEvent::Progress { bytes_written, .. } => Some(*bytes_written),
                    _ => None,
                })
                .collect()
        }

        pub fn count_completed(&self) -> usize {
            self.count(|e| matches!(e, UploadEvent::Completed { .. }))
        }

        pub fn count_failed(&self) -> usize {
            self.count(|e| matches!(e, UploadEvent::Failed { .. }))
        }

        pub fn count_auth_required(&self) -> usize {
            self.count(|e| matches!(e, UploadEvent::AuthRequired { .. }))
        }

        fn count(&self, pred: impl Fn(&UploadEvent) -> bool) -> usize {
            self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
        }
    }

    impl EventSink for RecordingSink {
        fn progress(&self, id: &str, bytes_written: u64, bytes_total: u64) {
            self.push(UploadEvent::Progress {
                id: id.to_string(),
                endpoint_url: "test".into(),
                bytes_written,
                bytes_total,
            });
        }

        fn completed(&self, id: &str, result_url: &str) {
            self.push(UploadEvent::Completed {
                id: id.to_string(),
                endpoint_url: "test".into(),
                result_url: result_url.to_string(),
            });
        }

        fn failed(&self, id: &str, error: &str) {
            self.push(UploadEvent::Failed {
                id: id.to_string(),
                endpoint_url: "test".into(),
                error: error.to_string(),
            });
        }

        fn auth_required(&self, id: &str, error: Option<&str>) {
            self.push(UploadEvent::AuthRequired {
                id: id.to_string(),
                endpoint_url: "test".into(),
                error: error.map(|e| e.to_string()),
            });
        }

        fn status_changed(&self, id: &str, status: UploadStatus, error: Option<&str>) {
            self.push(UploadEvent::StatusChanged {
                id: id.to_string(),
                endpoint_url: "test".into(),
                status,
                error: error.map(|e| e.to_string()),
            });
        }
    }

    /// Write a throwaway upload file and return its path.
    pub async fn temp_upload_file(name: &str, len: usize) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "tusup_session_{}_{}",
            std::process::id(),
            name
        ));
        tokio::fs::write(&path, vec![0xabu8; len]).await.unwrap();
        path
    }

    pub fn small_chunk_settings() -> TusSettings {
        TusSettings {
            chunk_size: 100,
            max_retries: 3,
            retry_delay_ms: 1,
            ..TusSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::path::PathBuf;
    use tusup_types::UploadEvent;

    struct Harness {
        store: UploadStore,
        protocol: Arc<MockProtocol>,
        sink: Arc<RecordingSink>,
        paused: Arc<AtomicBool>,
        cancelled: Arc<AtomicBool>,
    }

    impl Harness {
        async fn new() -> Self {
            Self {
                store: UploadStore::in_memory().await.unwrap(),
                protocol: Arc::new(MockProtocol::default()),
                sink: Arc::new(RecordingSink::default()),
                paused: Arc::new(AtomicBool::new(false)),
                cancelled: Arc::new(AtomicBool::new(false)),
            }
        }

        async fn record(&self, id: &str, path: PathBuf, size: u64) -> UploadRecord {
            let record = UploadRecord::new(id.to_string(), path, size);
            self.store.put(&record).await.unwrap();
            record
        }

        fn session(&self, record: UploadRecord, reconcile: bool) -> UploadSession {
            UploadSession::new(
                record,
                self.store.clone(),
                self.protocol.clone(),
                self.sink.clone(),
                small_chunk_settings(),
                self.paused.clone(),
                self.cancelled.clone(),
                reconcile,
            )
        }
    }

    #[tokio::test]
    async fn three_hundred_bytes_in_three_chunks() {
        let h = Harness::new().await;
        let path = temp_upload_file("three_chunks", 300).await;
        let record = h.record("three_chunks", path.clone(), 300).await;

        h.session(record, false).run().await;

        assert_eq!(h.protocol.acknowledged(), vec![0, 100, 200]);
        assert_eq!(h.sink.progress_offsets(), vec![100, 200, 300]);
        assert_eq!(h.sink.count_completed(), 1);
        assert_eq!(h.sink.count_failed(), 0);

        let stored = h.store.get("three_chunks").await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Completed);
        assert_eq!(stored.offset, 300);
        assert_eq!(stored.resource_url.as_deref(), Some(MOCK_RESOURCE_URL));
        assert!(stored.completed_at.is_some());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn completed_event_carries_resource_url() {
        let h = Harness::new().await;
        let path = temp_upload_file("result_url", 50).await;
        let record = h.record("result_url", path.clone(), 50).await;

        h.session(record, false).run().await;

        let events = h.sink.events.lock().unwrap();
        let result_url = events.iter().find_map(|e| match e {
            UploadEvent::Completed { result_url, .. } => Some(result_url.clone()),
            _ => None,
        });
        drop(events);
        assert_eq!(result_url.as_deref(), Some(MOCK_RESOURCE_URL));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn offset_mismatch_reconciles_once_and_completes() {
        let h = Harness::new().await;
        let path = temp_upload_file("mismatch", 300).await;
        let record = h.record("mismatch", path.clone(), 300).await;

        h.protocol
            .script_append_errors(vec![Some(TusError::OffsetMismatch { local: 0 })]);

        h.session(record, false).run().await;

        // One reconciliation query, then the transfer runs through.
        assert_eq!(h.protocol.query_count.load(Ordering::SeqCst), 1);
        assert_eq!(h.protocol.acknowledged(), vec![0, 100, 200]);

        // No duplicate progress events for the same offset.
        let offsets = h.sink.progress_offsets();
        let mut deduped = offsets.clone();
        deduped.dedup();
        assert_eq!(offsets, deduped);
        assert_eq!(offsets, vec![100, 200, 300]);
        assert_eq!(h.sink.count_completed(), 1);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn persistent_mismatch_exhausts_budget_and_fails() {
        let h = Harness::new().await;
        let path = temp_upload_file("mismatch_budget", 300).await;
        let record = h.record("mismatch_budget", path.clone(), 300).await;

        // More scripted mismatches than the retry budget allows.
        h.protocol.script_append_errors(
            (0..10)
                .map(|_| Some(TusError::OffsetMismatch { local: 0 }))
                .collect(),
        );

        h.session(record, false).run().await;

        assert_eq!(h.sink.count_failed(), 1);
        assert_eq!(h.sink.count_completed(), 0);
        let stored = h.store.get("mismatch_budget").await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Failed);
        assert!(stored.error.is_some());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn auth_required_pauses_then_retry_resumes_from_offset() {
        let h = Harness::new().await;
        let path = temp_upload_file("auth", 300).await;
        let record = h.record("auth", path.clone(), 300).await;

        // First chunk lands, second demands re-authentication.
        h.protocol
            .script_append_errors(vec![None, Some(TusError::AuthRequired)]);

        h.session(record, false).run().await;

        assert_eq!(h.sink.count_auth_required(), 1);
        assert_eq!(h.sink.count_failed(), 0);
        let stored = h.store.get("auth").await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Paused);
        assert_eq!(stored.offset, 100);

        // Retry with refreshed headers resumes from the confirmed offset.
        let mut retry_record = stored;
        retry_record
            .headers
            .insert("Authorization".into(), "Bearer fresh".into());
        h.session(retry_record, true).run().await;

        assert_eq!(h.protocol.acknowledged(), vec![0, 100, 200]);
        assert_eq!(h.sink.count_completed(), 1);
        assert_eq!(h.sink.count_auth_required(), 1);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn pause_at_chunk_boundary_then_resume_keeps_offset() {
        let h = Harness::new().await;
        let path = temp_upload_file("pause", 300).await;
        let record = h.record("pause", path.clone(), 300).await;

        // Pause lands while the second chunk is in flight: that append is
        // allowed to finish before the flag is honored.
        *h.protocol.pause_after_offset.lock().unwrap() = Some((100, h.paused.clone()));

        h.session(record, false).run().await;

        let stored = h.store.get("pause").await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Paused);
        assert_eq!(stored.offset, 200);

        // Resume reconciles and picks up exactly where it stopped.
        h.paused.store(false, Ordering::SeqCst);
        h.session(stored, true).run().await;

        assert_eq!(h.protocol.acknowledged(), vec![0, 100, 200]);
        assert_eq!(h.sink.progress_offsets(), vec![100, 200, 300]);
        assert_eq!(h.sink.count_completed(), 1);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_before_first_chunk() {
        let h = Harness::new().await;
        let path = temp_upload_file("cancel", 300).await;
        let record = h.record("cancel", path.clone(), 300).await;

        h.cancelled.store(true, Ordering::SeqCst);
        h.session(record, false).run().await;

        assert!(h.protocol.acknowledged().is_empty());
        assert_eq!(h.sink.count_completed(), 0);
        assert_eq!(h.sink.count_failed(), 0);
        let stored = h.store.get("cancel").await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Canceled);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn stale_resource_is_recreated_on_retry() {
        let h = Harness::new().await;
        let path = temp_upload_file("stale", 200).await;
        let mut record = h.record("stale", path.clone(), 200).await;
        record.resource_url = Some("https://upload.test/files/stale".into());
        record.offset = 100;
        record.status = UploadStatus::Failed;
        h.store.put(&record).await.unwrap();

        h.protocol.gone_on_query.store(true, Ordering::SeqCst);

        h.session(record, true).run().await;

        // The stale location was discarded and a brand-new upload ran.
        assert_eq!(h.protocol.create_count.load(Ordering::SeqCst), 1);
        assert_eq!(h.protocol.acknowledged(), vec![0, 100]);
        let stored = h.store.get("stale").await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Completed);
        assert_eq!(stored.resource_url.as_deref(), Some(MOCK_RESOURCE_URL));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_fails_without_network_traffic() {
        let h = Harness::new().await;
        let path = std::env::temp_dir().join("tusup_session_never_written");
        let record = h.record("missing", path, 300).await;

        h.session(record, false).run().await;

        assert_eq!(h.protocol.create_count.load(Ordering::SeqCst), 0);
        assert_eq!(h.sink.count_failed(), 1);
        let stored = h.store.get("missing").await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Failed);
    }

    #[tokio::test]
    async fn transient_network_failures_are_retried() {
        let h = Harness::new().await;
        let path = temp_upload_file("transient", 200).await;
        let record = h.record("transient", path.clone(), 200).await;

        h.protocol.script_append_errors(vec![
            Some(TusError::NetworkFailure("connection reset".into())),
            None,
        ]);

        h.session(record, false).run().await;

        assert_eq!(h.protocol.acknowledged(), vec![0, 100]);
        assert_eq!(h.sink.count_completed(), 1);
        assert_eq!(h.sink.count_failed(), 0);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
