//! Periodic free-space reports for connected panels.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::storage;
use crate::wire::protocol::{self, Envelope};

/// Report free space on the volume holding `output_dir` every `interval`
/// until `token` fires.
///
/// The first report goes out immediately so a freshly connected panel sees
/// capacity without waiting a full interval. A failed sample or a closed
/// outbound queue stops the reports for the rest of the session; the session
/// itself is unaffected.
pub async fn report_free_space(
    output_dir: PathBuf,
    interval: Duration,
    outbound: mpsc::Sender<Envelope>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let usage = match storage::free_space(&output_dir) {
                    Ok(usage) => usage,
                    Err(e) => {
                        tracing::warn!(
                            path = %output_dir.display(),
                            error = %e,
                            "Free space sample failed, stopping reports"
                        );
                        break;
                    }
                };
                let envelope = match Envelope::event(protocol::EVT_FREESPACE, &usage) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode free space report");
                        break;
                    }
                };
                if outbound.send(envelope).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Free space reporter stopped");
}
