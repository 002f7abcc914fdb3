//! Shared types for tusup
//!
//! This crate contains the data structures shared between the upload
//! engine and the host-facing layers (CLI, embedders).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Upload Types
// ============================================================================

/// A single resumable upload tracked by the engine.
///
/// The record is the durable half of an upload session: it survives process
/// restarts and carries everything needed to resume against the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Stable upload id, caller-supplied or derived from the file name.
    pub id: String,
    /// Local file being uploaded.
    pub file_path: PathBuf,
    /// Total size of the local file in bytes.
    pub file_size: u64,
    /// File type hint (extension with leading dot), sent in the metadata.
    pub file_type: Option<String>,
    /// Server-assigned upload URL. Absent until the resource is created,
    /// and never changed afterwards.
    pub resource_url: Option<String>,
    /// Last server-confirmed byte offset. Never decreases, never exceeds
    /// `file_size`.
    pub offset: u64,
    pub status: UploadStatus,
    /// Custom headers sent with every protocol request.
    pub headers: HashMap<String, String>,
    /// Metadata attached to the resource at creation. Immutable once the
    /// resource exists.
    pub metadata: HashMap<String, String>,
    /// Last classified failure, if any.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadRecord {
    pub fn new(id: String, file_path: PathBuf, file_size: u64) -> Self {
        let file_type = infer_file_type(&file_path);
        Self {
            id,
            file_path,
            file_size,
            file_type,
            resource_url: None,
            offset: 0,
            status: UploadStatus::New,
            headers: HashMap::new(),
            metadata: HashMap::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn progress(&self) -> f64 {
        if self.file_size > 0 {
            (self.offset as f64 / self.file_size as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Remaining bytes to transfer.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }
}

/// Status of an upload.
///
/// `Completed` and `Canceled` are terminal; everything else can still move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Record exists, no remote resource yet.
    New,
    /// Resource creation request in flight.
    Creating,
    /// Chunks are being appended.
    Transferring,
    /// Stopped at a chunk boundary, resumable.
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Canceled)
    }

    /// Whether a `retry` command is accepted in this state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadStatus::Paused | UploadStatus::Failed)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UploadStatus::New => "new",
            UploadStatus::Creating => "creating",
            UploadStatus::Transferring => "transferring",
            UploadStatus::Paused => "paused",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Transport options carried from the host's init call.
///
/// Background-session plumbing itself is the host platform's concern; the
/// engine records the flags so an embedder can configure its transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadOptions {
    #[serde(default)]
    pub enable_background: bool,
    #[serde(default = "default_true")]
    pub allows_cellular_access: bool,
}

fn default_true() -> bool {
    true
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TusSettings {
    /// Bytes per chunk append.
    pub chunk_size: u64,
    /// Upper bound on uploads transferring at the same time.
    pub max_concurrent_uploads: usize,
    /// Retries per chunk for transient failures before the session fails.
    pub max_retries: u32,
    /// Base delay between retries in milliseconds (doubled per attempt).
    pub retry_delay_ms: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for TusSettings {
    fn default() -> Self {
        Self {
            chunk_size: 5 * 1024 * 1024,
            max_concurrent_uploads: 4,
            max_retries: 5,
            retry_delay_ms: 500,
            request_timeout_secs: 60,
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the engine to the host.
///
/// Every variant carries the configured endpoint so a host multiplexing
/// several engines can route them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UploadEvent {
    Progress {
        id: String,
        endpoint_url: String,
        bytes_written: u64,
        bytes_total: u64,
    },
    Completed {
        id: String,
        endpoint_url: String,
        result_url: String,
    },
    Failed {
        id: String,
        endpoint_url: String,
        error: String,
    },
    AuthRequired {
        id: String,
        endpoint_url: String,
        error: Option<String>,
    },
    StatusChanged {
        id: String,
        endpoint_url: String,
        status: UploadStatus,
        error: Option<String>,
    },
}

impl UploadEvent {
    pub fn upload_id(&self) -> &str {
        match self {
            UploadEvent::Progress { id, .. }
            | UploadEvent::Completed { id, .. }
            | UploadEvent::Failed { id, .. }
            | UploadEvent::AuthRequired { id, .. }
            | UploadEvent::StatusChanged { id, .. } => id,
        }
    }
}

// ============================================================================
// File identity helpers
// ============================================================================

/// Derive a stable upload id from a file path (the file stem).
///
/// Returns `None` when no name can be inferred, which callers must treat
/// as a rejected request rather than inventing an id.
pub fn infer_upload_id(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}

/// File type hint: the extension with a leading dot.
pub fn infer_file_type(path: &Path) -> Option<String> {
    path.extension().map(|e| format!(".{}", e.to_string_lossy()))
}
