//! tusup-core: resumable upload engine speaking tus 1.0.0
//!
//! `TusCore` is the entry point for hosts (the CLI, an embedding app). It
//! is configured once with a data directory and a server endpoint, owns
//! the record store and the session manager, and fans engine events out
//! over a broadcast channel.

pub mod chunk_reader;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

pub use error::TusError;
pub use manager::StartOutcome;
pub use protocol::{ProtocolDriver, TusProtocol, TUS_VERSION};
pub use sink::{BroadcastSink, EventSink};
pub use store::UploadStore;
pub use tusup_types::{
    infer_upload_id, TusSettings, UploadEvent, UploadOptions, UploadRecord, UploadStatus,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The upload engine, configured once per endpoint.
pub struct TusCore {
    endpoint_url: String,
    options: UploadOptions,
    store: UploadStore,
    manager: manager::UploadManager,
    events: broadcast::Sender<UploadEvent>,
}

impl TusCore {
    /// Open (or create) the record store under `data_dir` and build the
    /// engine against `endpoint`. Rejects non-HTTP endpoints up front.
    pub async fn new(
        data_dir: &Path,
        endpoint: &str,
        options: UploadOptions,
        settings: TusSettings,
    ) -> Result<Self, TusError> {
        let protocol = TusProtocol::new(
            endpoint,
            Duration::from_secs(settings.request_timeout_secs),
        )?;

        tokio::fs::create_dir_all(data_dir).await?;
        let store = UploadStore::new(data_dir.join("uploads.db")).await?;

        info!(endpoint, data_dir = %data_dir.display(), "upload engine ready");
        Ok(Self::assemble(
            endpoint.to_string(),
            options,
            store,
            Arc::new(protocol),
            settings,
        ))
    }

    fn assemble(
        endpoint_url: String,
        options: UploadOptions,
        store: UploadStore,
        protocol: Arc<dyn ProtocolDriver>,
        settings: TusSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let sink = Arc::new(BroadcastSink::new(endpoint_url.clone(), events.clone()));
        let manager = manager::UploadManager::new(store.clone(), protocol, sink, settings);
        Self {
            endpoint_url,
            options,
            store,
            manager,
            events,
        }
    }

    /// The endpoint this engine was configured with. Later configuration
    /// attempts in a host bridge should return this instead of rebuilding.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Subscribe to engine events. Each receiver sees every event emitted
    /// after the call; slow receivers lag rather than block the engine.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Enqueue a file and start (or resume) its upload.
    ///
    /// When `id` is absent it is derived from the file name, matching how
    /// hosts address uploads by file. The file name and type are folded
    /// into the resource metadata unless the caller already set them.
    pub async fn create_upload_from_file(
        &self,
        file_path: PathBuf,
        id: Option<String>,
        headers: HashMap<String, String>,
        metadata: HashMap<String, String>,
    ) -> Result<(String, StartOutcome), TusError> {
        let id = match id {
            Some(id) => id,
            None => infer_upload_id(&file_path).ok_or_else(|| {
                TusError::InvalidOperation(format!(
                    "cannot derive an upload id from {}",
                    file_path.display()
                ))
            })?,
        };

        let file_size = tokio::fs::metadata(&file_path)
            .await
            .map_err(|e| TusError::FileUnavailable(format!("{}: {e}", file_path.display())))?
            .len();

        let mut record = UploadRecord::new(id.clone(), file_path, file_size);
        record.headers = headers;
        record.metadata = metadata;
        if let Some(name) = record.file_path.file_name() {
            record
                .metadata
                .entry("filename".to_string())
                .or_insert_with(|| name.to_string_lossy().into_owned());
        }
        if let Some(file_type) = &record.file_type {
            record
                .metadata
                .entry("filetype".to_string())
                .or_insert_with(|| file_type.clone());
        }

        let outcome = self.manager.create_or_resume(record).await?;
        Ok((id, outcome))
    }

    /// Retry a paused or failed upload with optionally refreshed headers
    /// (an expired token is the common case).
    pub async fn retry_upload(
        &self,
        id: &str,
        headers: HashMap<String, String>,
    ) -> Result<(), TusError> {
        self.manager.retry(id, headers).await
    }

    pub async fn pause_upload(&self, id: &str) -> Result<(), TusError> {
        self.manager.pause(id).await
    }

    /// Cancel the upload and delete its record.
    pub async fn stop_and_remove_upload(&self, id: &str) -> Result<(), TusError> {
        self.manager.cancel_and_remove(id).await
    }

    pub async fn get_upload(&self, id: &str) -> Result<Option<UploadRecord>, TusError> {
        self.store.get(id).await
    }

    pub async fn list_uploads(&self) -> Result<Vec<UploadRecord>, TusError> {
        self.store.list_all().await
    }

    pub async fn list_active(&self) -> Vec<String> {
        self.manager.list_active().await
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.manager.is_active(id).await
    }

    /// Startup pass: reconcile records a previous process left mid-flight
    /// and park them paused. Hosts call this once before accepting
    /// commands; platform background-transfer wakeups land here too.
    pub async fn restore(&self) -> Result<(), TusError> {
        self.manager.restore().await
    }
}
