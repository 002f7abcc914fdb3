//! Event delivery to the host
//!
//! Sessions report through an [`EventSink`] injected at startup, one method
//! per event kind. The stock implementation fans out over a tokio broadcast
//! channel so any number of subscribers (CLI progress bars, a host bridge)
//! can listen.

use tokio::sync::broadcast;
use tracing::debug;
use tusup_types::{UploadEvent, UploadStatus};

/// Consumer of upload notifications.
pub trait EventSink: Send + Sync {
    fn progress(&self, id: &str, bytes_written: u64, bytes_total: u64);
    fn completed(&self, id: &str, result_url: &str);
    fn failed(&self, id: &str, error: &str);
    fn auth_required(&self, id: &str, error: Option<&str>);
    fn status_changed(&self, id: &str, status: UploadStatus, error: Option<&str>);
}

/// Broadcast-channel sink bound to one endpoint.
pub struct BroadcastSink {
    endpoint_url: String,
    tx: broadcast::Sender<UploadEvent>,
}

impl BroadcastSink {
    pub fn new(endpoint_url: String, tx: broadcast::Sender<UploadEvent>) -> Self {
        Self { endpoint_url, tx }
    }

    fn send(&self, event: UploadEvent) {
        // A send only fails when nobody is subscribed, which is fine.
        if self.tx.send(event).is_err() {
            debug!("upload event dropped, no subscribers");
        }
    }
}

impl EventSink for BroadcastSink {
    fn progress(&self, id: &str, bytes_written: u64, bytes_total: u64) {
        self.send(UploadEvent::Progress {
            id: id.to_string(),
            endpoint_url: self.endpoint_url.clone(),
            bytes_written,
            bytes_total,
        });
    }

    fn completed(&self, id: &str, result_url: &str) {
        self.send(UploadEvent::Completed {
            id: id.to_string(),
            endpoint_url: self.endpoint_url.clone(),
            result_url: result_url.to_string(),
        });
    }

    fn failed(&self, id: &str, error: &str) {
        self.send(UploadEvent::Failed {
            id: id.to_string(),
            endpoint_url: self.endpoint_url.clone(),
            error: error.to_string(),
        });
    }

    fn auth_required(&self, id: &str, error: Option<&str>) {
        self.send(UploadEvent::AuthRequired {
            id: id.to_string(),
            endpoint_url: self.endpoint_url.clone(),
            error: error.map(|e| e.to_string()),
        });
    }

    fn status_changed(&self, id: &str, status: UploadStatus, error: Option<&str>) {
        self.send(UploadEvent::StatusChanged {
            id: id.to_string(),
            endpoint_url: self.endpoint_url.clone(),
            status,
            error: error.map(|e| e.to_string()),
        });
    }
}
