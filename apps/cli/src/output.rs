//! Output formatting utilities

use console::{style, StyledObject};
use tusup_types::UploadStatus;

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// One-character status marker for list output
pub fn status_icon(status: UploadStatus) -> StyledObject<&'static str> {
    match status {
        UploadStatus::Completed => style("✓").green(),
        UploadStatus::Transferring | UploadStatus::Creating => style("↑").cyan(),
        UploadStatus::Paused => style("⏸").yellow(),
        UploadStatus::Failed => style("✗").red(),
        UploadStatus::Canceled => style("○").dim(),
        UploadStatus::New => style("·").dim(),
    }
}
