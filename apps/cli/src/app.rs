//! Upload run loop.
//!
//! Ctrl-C pauses a running transfer (or cancels hashing and verification);
//! Enter resumes a paused upload, a second Ctrl-C quits.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chunkup_http::HttpUploadClient;
use chunkup_session::{SessionController, SessionEvent, SessionOutcome, SessionState, UploadError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;

/// Uploads `file` and returns once it is stored, cancelled or abandoned
/// while paused.
pub async fn run(config: Config, file: &Path) -> anyhow::Result<()> {
    let client = Arc::new(HttpUploadClient::new(&config.http_config())?);
    let controller = Arc::new(SessionController::new(
        config.upload_config(),
        client.clone(),
        client.clone(),
        client,
    ));

    let events = controller
        .take_events()
        .context("session events already taken")?;
    let reporter = tokio::spawn(report_events(events));

    controller
        .select_path(file)
        .with_context(|| format!("cannot open {}", file.display()))?;
    info!(
        server = %config.server_url,
        chunk_size = config.chunk_size,
        max_concurrency = config.max_concurrency,
        "uploading {}",
        file.display()
    );

    let interrupts = tokio::spawn(pause_on_interrupt(Arc::clone(&controller)));
    let result = drive(&controller).await;
    interrupts.abort();
    let _ = interrupts.await;
    drop(controller);
    let _ = reporter.await;
    result
}

async fn drive(controller: &SessionController) -> anyhow::Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut outcome = start_or_retry(controller, controller.start().await).await?;

    loop {
        match outcome {
            SessionOutcome::Completed => {
                info!("upload complete");
                return Ok(());
            }
            SessionOutcome::Deduplicated => {
                info!("server already has this file, nothing to upload");
                return Ok(());
            }
            SessionOutcome::Cancelled => {
                info!("upload cancelled");
                return Ok(());
            }
            SessionOutcome::Paused => {
                info!(
                    percentage = controller.overall_percentage(),
                    "upload paused, press Enter to resume or Ctrl-C to quit"
                );
                tokio::select! {
                    line = stdin.next_line() => {
                        if line?.is_none() {
                            info!("stdin closed, leaving upload paused");
                            return Ok(());
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("leaving upload paused");
                        return Ok(());
                    }
                }
                outcome = start_or_retry(controller, controller.resume().await).await?;
            }
        }
    }
}

/// Retries the merge request once when it was the only step that failed.
async fn start_or_retry(
    controller: &SessionController,
    result: Result<SessionOutcome, UploadError>,
) -> anyhow::Result<SessionOutcome> {
    match result {
        Err(UploadError::Merge(e)) => {
            warn!(error = %e, "merge failed, retrying once");
            Ok(controller.retry_merge().await?)
        }
        other => Ok(other?),
    }
}

/// Pauses on Ctrl-C while transferring; cancels hashing and verification.
async fn pause_on_interrupt(controller: Arc<SessionController>) {
    while tokio::signal::ctrl_c().await.is_ok() {
        match controller.state() {
            SessionState::Transferring => {
                if let Err(e) = controller.pause() {
                    warn!(error = %e, "pause failed");
                }
            }
            SessionState::Hashing | SessionState::AwaitingVerification => {
                let _ = controller.cancel();
            }
            // Paused sessions are handled by the resume prompt.
            _ => {}
        }
    }
}

/// Logs session events until the controller is dropped.
async fn report_events(mut events: mpsc::Receiver<SessionEvent>) {
    let mut last_hash = 0u8;
    let mut last_overall = 0u8;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::HashProgress { percentage } => {
                if percentage / 10 > last_hash / 10 || percentage == 100 {
                    info!(percentage, "hashing");
                }
                last_hash = percentage;
            }
            SessionEvent::Verified {
                file_hash,
                should_upload,
                uploaded,
            } => {
                info!(%file_hash, should_upload, uploaded, "verified with server");
            }
            SessionEvent::ChunkProgress {
                index,
                percentage,
                overall,
            } => {
                if percentage == 100 {
                    tracing::debug!(index, "chunk uploaded");
                }
                if overall / 5 != last_overall / 5 {
                    info!(percentage = overall, "uploading");
                }
                last_overall = overall;
            }
            SessionEvent::StateChanged { state } => {
                tracing::debug!(%state, "state");
                if state == SessionState::Hashing {
                    last_hash = 0;
                    last_overall = 0;
                }
            }
            SessionEvent::Completed {
                file_hash,
                deduplicated,
            } => {
                info!(%file_hash, deduplicated, "file stored");
            }
            SessionEvent::Failed { error } => {
                tracing::error!(%error, "upload failed");
            }
        }
    }
}
