//! Physical deck operations: disc scan and media eject.

use std::io;

use futures::StreamExt;
use tokio::io::AsyncRead;

use crate::config::ToolConfig;
use crate::runner::{self, LineStream, SpawnError};
use crate::scanner::{self, DiscRecord};

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("failed reading inspector output: {0}")]
    Output(#[from] io::Error),
    #[error("eject failed with {0}")]
    Eject(std::process::ExitStatus),
}

/// Run the disc-inspection tool and parse its stdout into a [`DiscRecord`].
///
/// The record is returned regardless of the tool's exit status; a failed
/// inspection shows up as an empty or degraded record, the same way the
/// original panel presented it.
pub async fn scan_disc(inspector: &ToolConfig) -> Result<DiscRecord, DriveError> {
    let mut tool = runner::spawn_tool(&inspector.program, &inspector.args)?;

    let stdout = &mut tool.stdout;
    let stderr = &mut tool.stderr;
    let (lines, _) = tokio::join!(collect_lines(stdout), log_lines(stderr));
    let lines = lines?;

    match tool.wait().await {
        Ok(status) if !status.success() => {
            tracing::warn!(%status, "Inspector exited unsuccessfully");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to reap inspector"),
    }

    let record = scanner::parse_disc_output(lines.iter().map(String::as_str));
    tracing::info!(
        disc = %record.id,
        tracks = record.tracks.len(),
        parse_ok = record.parse_ok,
        "Disc scan finished"
    );
    Ok(record)
}

/// Eject the media; a non-zero exit from the tool is an error.
pub async fn eject(eject_tool: &ToolConfig) -> Result<(), DriveError> {
    let status = runner::run_status(&eject_tool.program, &eject_tool.args).await?;
    if !status.success() {
        return Err(DriveError::Eject(status));
    }
    tracing::info!("Media ejected");
    Ok(())
}

async fn collect_lines<S>(stream: &mut LineStream<S>) -> io::Result<Vec<String>>
where
    S: AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    while let Some(line) = stream.next().await {
        lines.push(line?);
    }
    Ok(lines)
}

async fn log_lines<S>(stream: &mut LineStream<S>)
where
    S: AsyncRead + Unpin,
{
    while let Some(line) = stream.next().await {
        match line {
            Ok(line) if !line.trim().is_empty() => {
                tracing::debug!(target: "ripdeck::tool", "{}", line.trim());
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
}
