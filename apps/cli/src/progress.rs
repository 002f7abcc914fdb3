//! Progress bar utilities for CLI uploads

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tusup_types::{UploadEvent, UploadRecord, UploadStatus};

/// Manages progress bars for multiple uploads
pub struct UploadProgress {
    multi: MultiProgress,
    bars: Arc<RwLock<HashMap<String, ProgressBar>>>,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a progress bar for an upload
    pub async fn add_upload(&self, record: &UploadRecord) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(record.file_size));

        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .unwrap()
                .progress_chars("█▓▒░  "),
        );

        pb.set_message(record.id.clone());
        pb.set_position(record.offset);

        self.bars.write().await.insert(record.id.clone(), pb.clone());
        pb
    }

    /// Update a progress bar from an engine event
    pub async fn handle_event(&self, event: &UploadEvent) {
        let bars = self.bars.read().await;
        let Some(pb) = bars.get(event.upload_id()) else {
            return;
        };

        match event {
            UploadEvent::Progress {
                bytes_written,
                bytes_total,
                ..
            } => {
                pb.set_length(*bytes_total);
                pb.set_position(*bytes_written);
            }

            UploadEvent::Completed { result_url, .. } => {
                pb.finish_with_message(format!(
                    "{} Uploaded to {}",
                    style("✓").green().bold(),
                    result_url
                ));
            }

            UploadEvent::Failed { error, .. } => {
                pb.abandon_with_message(format!("{} Failed: {}", style("✗").red().bold(), error));
            }

            UploadEvent::AuthRequired { .. } => {
                pb.set_message(format!(
                    "{} Authorization required",
                    style("⚠").yellow().bold()
                ));
            }

            UploadEvent::StatusChanged { status, .. } => match status {
                UploadStatus::Paused => {
                    pb.set_message(format!("{} Paused", style("⏸").yellow()));
                }
                UploadStatus::Canceled => {
                    pb.abandon_with_message(format!("{} Canceled", style("○").dim()));
                }
                _ => {}
            },
        }
    }

    /// Remove a progress bar
    pub async fn remove(&self, id: &str) {
        if let Some(pb) = self.bars.write().await.remove(id) {
            pb.finish_and_clear();
        }
    }
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self::new()
    }
}
