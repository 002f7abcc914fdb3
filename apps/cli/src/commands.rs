//! CLI command implementations

use crate::output::{format_bytes, status_icon};
use crate::progress::UploadProgress;
use crate::OutputFormat;
use anyhow::{anyhow, Result};
use console::style;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tusup_core::{StartOutcome, TusCore};
use tusup_types::{UploadEvent, UploadRecord, UploadStatus};

// ============================================================================
// Upload Commands
// ============================================================================

pub async fn add_upload(
    core: &TusCore,
    file: PathBuf,
    id: Option<String>,
    headers: Vec<(String, String)>,
    meta: Vec<(String, String)>,
    format: OutputFormat,
) -> Result<()> {
    // Subscribe before starting so no event is missed.
    let mut rx = core.subscribe();

    let (id, outcome) = core
        .create_upload_from_file(
            file,
            id,
            headers.into_iter().collect(),
            meta.into_iter().collect(),
        )
        .await?;

    if outcome == StartOutcome::InProgress {
        match format {
            OutputFormat::Json => println!("{}", json!({ "inProgress": true })),
            _ => println!(
                "{} Upload {} is already in progress",
                style("·").dim(),
                style(&id).cyan()
            ),
        }
        return Ok(());
    }

    follow(core, vec![id], &mut rx, format).await
}

pub async fn retry_upload(
    core: &TusCore,
    id: &str,
    headers: Vec<(String, String)>,
    format: OutputFormat,
) -> Result<()> {
    let mut rx = core.subscribe();
    core.retry_upload(id, headers.into_iter().collect()).await?;
    follow(core, vec![id.to_string()], &mut rx, format).await
}

pub async fn pause_upload(core: &TusCore, id: &str, format: OutputFormat) -> Result<()> {
    core.pause_upload(id).await?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "paused": true })),
        _ => println!("{} Upload paused", style("✓").green().bold()),
    }
    Ok(())
}

pub async fn cancel_upload(
    core: &TusCore,
    id: &str,
    yes: bool,
    format: OutputFormat,
) -> Result<()> {
    if !yes && matches!(format, OutputFormat::Human | OutputFormat::Table) {
        use dialoguer::Confirm;

        let confirmed = Confirm::new()
            .with_prompt(format!("Cancel upload {id} and delete its record?"))
            .default(false)
            .interact()?;
        if !confirmed {
            return Ok(());
        }
    }

    core.stop_and_remove_upload(id).await?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "canceled": true })),
        _ => println!("{} Upload canceled", style("✓").green().bold()),
    }
    Ok(())
}

pub async fn list_uploads(
    core: &TusCore,
    status_filter: Option<String>,
    show_all: bool,
    format: OutputFormat,
) -> Result<()> {
    let uploads = core.list_uploads().await?;

    let filtered: Vec<_> = uploads
        .into_iter()
        .filter(|record| match &status_filter {
            Some(status) => record
                .status
                .to_string()
                .contains(&status.to_lowercase()),
            None => true,
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&filtered)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct UploadRow {
                id: String,
                file: String,
                size: String,
                progress: String,
                status: String,
            }

            let rows: Vec<UploadRow> = filtered
                .iter()
                .map(|record| UploadRow {
                    id: record.id.clone(),
                    file: record
                        .file_path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| record.file_path.display().to_string()),
                    size: format_bytes(record.file_size),
                    progress: format!("{:.1}%", record.progress()),
                    status: record.status.to_string(),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            if filtered.is_empty() {
                println!("{}", style("No uploads found").dim());
                return Ok(());
            }

            for record in &filtered {
                print_upload_summary(record, show_all);
            }
            println!();
            println!("{} upload(s) total", style(filtered.len()).bold());
        }
    }

    Ok(())
}

pub async fn show_info(core: &TusCore, id: &str, format: OutputFormat) -> Result<()> {
    let record = core
        .get_upload(id)
        .await?
        .ok_or_else(|| anyhow!("no upload with id {id}"))?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        _ => {
            print_upload_summary(&record, true);
        }
    }

    Ok(())
}

pub async fn resume_all(core: &TusCore, format: OutputFormat) -> Result<()> {
    let mut rx = core.subscribe();
    core.restore().await?;

    let mut ids = Vec::new();
    for record in core.list_uploads().await? {
        if record.status.is_retryable() {
            core.retry_upload(&record.id, HashMap::new()).await?;
            ids.push(record.id);
        }
    }

    if ids.is_empty() {
        match format {
            OutputFormat::Json => println!("{}", json!({ "resumed": 0 })),
            _ => println!("{}", style("Nothing to resume").dim()),
        }
        return Ok(());
    }

    follow(core, ids, &mut rx, format).await
}

// ============================================================================
// Event following
// ============================================================================

/// Watch the event stream until every given upload reaches a resting state
/// (completed, failed, paused, or canceled). Human output drives progress
/// bars; JSON output prints one bridge-shaped result line per upload.
async fn follow(
    core: &TusCore,
    ids: Vec<String>,
    rx: &mut broadcast::Receiver<UploadEvent>,
    format: OutputFormat,
) -> Result<()> {
    let human = !matches!(format, OutputFormat::Json);
    let progress = UploadProgress::new();

    if human {
        for id in &ids {
            if let Some(record) = core.get_upload(id).await? {
                progress.add_upload(&record).await;
            }
        }
    }

    let mut pending: HashSet<String> = ids.into_iter().collect();
    while !pending.is_empty() {
        match rx.recv().await {
            Ok(event) => {
                if human {
                    progress.handle_event(&event).await;
                }
                if let Some(result) = bridge_result(&event) {
                    if pending.remove(event.upload_id()) && !human {
                        println!("{}", serde_json::to_string(&result)?);
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    Ok(())
}

/// The final result shape for an upload, if this event is one.
fn bridge_result(event: &UploadEvent) -> Option<serde_json::Value> {
    match event {
        UploadEvent::Completed { id, result_url, .. } => {
            Some(json!({ "id": id, "resultUrl": result_url }))
        }
        UploadEvent::Failed { id, error, .. } => {
            Some(json!({ "id": id, "error": true, "reason": error }))
        }
        UploadEvent::AuthRequired { id, .. } => {
            Some(json!({ "id": id, "authRequired": true }))
        }
        UploadEvent::StatusChanged { id, status, .. } => match status {
            UploadStatus::Paused => Some(json!({ "id": id, "paused": true })),
            UploadStatus::Canceled => Some(json!({ "id": id, "canceled": true })),
            _ => None,
        },
        UploadEvent::Progress { .. } => None,
    }
}

fn print_upload_summary(record: &UploadRecord, detailed: bool) {
    let progress = format!("{:.1}%", record.progress());

    println!(
        "{} {} {} [{}]",
        status_icon(record.status),
        style(&record.id).bold(),
        style(&progress).dim(),
        style(record.status.to_string()).dim()
    );

    if detailed {
        println!("    File: {}", record.file_path.display());
        println!(
            "    Size: {} / {}",
            format_bytes(record.offset),
            format_bytes(record.file_size)
        );
        if let Some(ref url) = record.resource_url {
            println!("    Resource: {}", url);
        }
        if let Some(ref error) = record.error {
            println!("    Error: {}", style(error).red());
        }
        println!();
    }
}
