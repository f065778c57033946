//! One connected control panel.
//!
//! A session runs three tasks: the read loop (this module), a writer that
//! drains the outbound event queue onto the transport, and the free-space
//! reporter. Command handlers run on the read loop, one command at a time.
//! A rip job keeps polling the inbound stream between progress events, so
//! `interrupt` takes effect mid-track instead of queueing behind the job.

use std::fmt;
use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::drive::{self, DriveError};
use crate::rip::{self, RipError};
use crate::station::Station;
use crate::storage;
use crate::telemetry;
use crate::wire::codec::JsonCodec;
use crate::wire::protocol::{self, Envelope, RipTrack};

/// Outbound events queued ahead of the transport writer.
const OUTBOUND_CAPACITY: usize = 256;

/// Identifies one panel connection in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Conditions that end the session.
#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("transport failed: {0}")]
    Transport(#[from] io::Error),
    #[error("connection closed by peer")]
    Disconnected,
    #[error("event queue closed")]
    QueueClosed,
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single command's failure. The message is what the panel sees in the
/// `error` event; the session itself carries on.
#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error("Bad payload: {0}")]
    Payload(serde_json::Error),
    #[error(transparent)]
    Rip(#[from] RipError),
    #[error(transparent)]
    Drive(#[from] DriveError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Busy: rip in progress")]
    Busy,
    #[error("Unknown command: {0}")]
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

enum TrackOutcome {
    Completed,
    Interrupted,
}

/// Producer half of the outbound event queue.
struct EventSink {
    tx: mpsc::Sender<Envelope>,
}

impl EventSink {
    async fn send(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| SessionError::QueueClosed)
    }

    async fn event<P: Serialize>(&self, tag: &str, payload: &P) -> Result<(), SessionError> {
        self.send(Envelope::event(tag, payload)?).await
    }
}

/// Drive a panel connection until it closes or `token` fires.
///
/// Teardown happens exactly once, on every exit path: the token is
/// cancelled, the reporter joined, the queue closed, and the writer joined
/// after flushing whatever is still queued.
pub async fn run<S>(station: Arc<Station>, stream: S, token: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let session = SessionId::new();
    let _session_guard = station.track_session();
    tracing::info!(%session, "Session opened");

    let (read_half, write_half) = tokio::io::split(stream);
    let frames = FramedRead::new(read_half, JsonCodec::<Envelope>::new());
    let sink = FramedWrite::new(write_half, JsonCodec::<Envelope>::new());

    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer = spawn_writer(sink, outbound_rx, token.clone());
    let reporter = tokio::spawn(telemetry::report_free_space(
        station.config.output_dir.clone(),
        station.config.telemetry_interval,
        outbound.clone(),
        token.clone(),
    ));

    let mut commands = Commands {
        session,
        station: Arc::clone(&station),
        frames,
        events: EventSink { tx: outbound },
        token: token.clone(),
    };
    match commands.serve().await {
        Ok(()) => tracing::info!(%session, "Session closed"),
        Err(SessionError::Disconnected) => {
            tracing::info!(%session, "Panel disconnected mid-command")
        }
        Err(e) => tracing::warn!(%session, error = %e, "Session ended"),
    }

    token.cancel();
    if let Err(e) = reporter.await {
        tracing::warn!(error = %e, "Free space reporter panicked");
    }
    drop(commands);
    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "Writer task panicked");
    }
}

/// Writer context: single consumer of the outbound queue, so events reach
/// the transport in the order they were enqueued. A write failure cancels
/// the session token; the read loop notices and tears down.
fn spawn_writer<W>(
    mut sink: FramedWrite<W, JsonCodec<Envelope>>,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    token: CancellationToken,
) -> JoinHandle<()>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if let Err(e) = sink.send(envelope).await {
                tracing::warn!(error = %e, "Event write failed, closing session");
                token.cancel();
                break;
            }
        }
    })
}

struct Commands<R> {
    session: SessionId,
    station: Arc<Station>,
    frames: FramedRead<R, JsonCodec<Envelope>>,
    events: EventSink,
    token: CancellationToken,
}

impl<R> Commands<R>
where
    R: AsyncRead + Unpin,
{
    async fn serve(&mut self) -> Result<(), SessionError> {
        loop {
            let envelope = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(()),
                frame = self.frames.next() => match frame {
                    Some(Ok(Ok(envelope))) => envelope,
                    Some(Ok(Err(e))) => {
                        tracing::warn!(error = %e, "Discarding malformed frame");
                        self.events
                            .send(Envelope::error(format!("Bad frame: {e}")))
                            .await?;
                        continue;
                    }
                    Some(Err(e)) => return Err(SessionError::Transport(e)),
                    None => return Ok(()),
                },
            };

            tracing::debug!(session = %self.session, cmd = %envelope.cmd, "Command received");
            if let Err(e) = self.dispatch(&envelope).await {
                match e {
                    HandlerError::Command(e) => {
                        tracing::warn!(
                            session = %self.session,
                            cmd = %envelope.cmd,
                            error = %e,
                            "Command failed"
                        );
                        self.events.send(Envelope::error(e.to_string())).await?;
                    }
                    HandlerError::Session(e) => return Err(e),
                }
            }
        }
    }

    async fn dispatch(&mut self, envelope: &Envelope) -> Result<(), HandlerError> {
        match envelope.cmd.as_str() {
            protocol::CMD_SCAN => self.scan().await,
            protocol::CMD_RIP => self.rip_job(envelope).await,
            // Outside a rip job there is nothing to cancel.
            protocol::CMD_INTERRUPT => Ok(()),
            protocol::CMD_EJECT => self.eject().await,
            protocol::CMD_TIDY => self.tidy().await,
            other => Err(CommandError::Unknown(other.to_string()).into()),
        }
    }

    async fn scan(&self) -> Result<(), HandlerError> {
        let record = drive::scan_disc(&self.station.config.inspector)
            .await
            .map_err(CommandError::from)?;
        self.events.event(protocol::EVT_SCAN, &record).await?;
        Ok(())
    }

    async fn eject(&self) -> Result<(), HandlerError> {
        drive::eject(&self.station.config.eject)
            .await
            .map_err(CommandError::from)?;
        self.events
            .send(Envelope::empty(protocol::EVT_EJECT_SUCCESS))
            .await?;
        Ok(())
    }

    async fn tidy(&self) -> Result<(), HandlerError> {
        let removed = storage::tidy(&self.station.config.output_dir)
            .await
            .map_err(CommandError::from)?;
        tracing::info!(removed, "Output directory tidied");
        Ok(())
    }

    async fn rip_job(&mut self, request: &Envelope) -> Result<(), HandlerError> {
        let tracks: Vec<RipTrack> = request.decode_payload().map_err(CommandError::Payload)?;
        tracing::info!(tracks = tracks.len(), "Rip job started");
        for track in &tracks {
            match self.rip_track(track).await? {
                TrackOutcome::Completed => {}
                // An interrupt abandons the rest of the request, not just
                // the current track.
                TrackOutcome::Interrupted => return Ok(()),
            }
        }
        tracing::info!("Rip job finished");
        Ok(())
    }

    async fn rip_track(&mut self, track: &RipTrack) -> Result<TrackOutcome, HandlerError> {
        let dest = rip::output_path(&self.station.config.output_dir, &track.filename)
            .map_err(CommandError::from)?;
        self.events.event(protocol::EVT_RIP_STARTED, track).await?;
        let mut job = rip::spawn_track_rip(&self.station.config.ripper, track.track, &dest)
            .map_err(CommandError::from)?;
        let _rip_guard = self.station.track_rip();

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    job.abort().await;
                    self.events.event(protocol::EVT_RIP_INTERRUPTED, track).await?;
                    tracing::info!(track = track.track, "Rip aborted by session shutdown");
                    return Ok(TrackOutcome::Interrupted);
                }
                frame = self.frames.next() => match frame {
                    Some(Ok(Ok(inbound))) if inbound.cmd == protocol::CMD_INTERRUPT => {
                        job.abort().await;
                        self.events.event(protocol::EVT_RIP_INTERRUPTED, track).await?;
                        tracing::info!(track = track.track, "Rip interrupted");
                        return Ok(TrackOutcome::Interrupted);
                    }
                    Some(Ok(Ok(inbound))) => {
                        tracing::warn!(cmd = %inbound.cmd, "Command rejected while rip in progress");
                        self.events
                            .send(Envelope::error(CommandError::Busy.to_string()))
                            .await?;
                    }
                    Some(Ok(Err(e))) => {
                        tracing::warn!(error = %e, "Discarding malformed frame");
                        self.events
                            .send(Envelope::error(format!("Bad frame: {e}")))
                            .await?;
                    }
                    Some(Err(e)) => {
                        job.abort().await;
                        return Err(SessionError::Transport(e).into());
                    }
                    None => {
                        job.abort().await;
                        return Err(SessionError::Disconnected.into());
                    }
                },
                update = job.recv() => match update {
                    Some(progress) => {
                        self.events.event(protocol::EVT_RIP_PROGRESS, &progress).await?;
                    }
                    None => break,
                },
            }
        }

        match job.finish().await {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::warn!(track = track.track, %status, "Ripper exited with failure")
            }
            Err(e) => tracing::warn!(track = track.track, error = %e, "Could not reap ripper"),
        }
        self.events.event(protocol::EVT_RIP_COMPLETED, track).await?;
        tracing::info!(track = track.track, "Track rip completed");
        Ok(TrackOutcome::Completed)
    }
}
