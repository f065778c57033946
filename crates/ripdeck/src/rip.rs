//! Rip-track execution.
//!
//! One ripper process per track. Pump tasks scan both output streams for
//! progress lines and feed a bounded channel; the channel closing means the
//! tool's output ended. The tool is chatty, so informational lines are
//! dropped without comment.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::ExitStatus;
use std::sync::OnceLock;

use futures::StreamExt;
use regex::Regex;
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ToolConfig;
use crate::runner::{self, LineStream, SpawnError, ToolProcess};
use crate::wire::protocol::{PERCENT_UNKNOWN, RipProgress};

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum RipError {
    #[error("invalid output filename {0:?}")]
    BadFilename(String),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

fn progress_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // The percent suffix disappears when the tool cannot estimate totals.
    PATTERN.get_or_init(|| {
        Regex::new(r"^dump: (\d+) bytes written(?: \(~([^%)]*)%\))?$").unwrap()
    })
}

/// Parse one line of ripper output into `(bytes, percent)`.
///
/// Returns `None` for informational lines and for progress lines whose byte
/// count does not fit in a u64. An absent or unparseable percent yields
/// [`PERCENT_UNKNOWN`].
pub fn parse_progress_line(line: &str) -> Option<(u64, f64)> {
    let caps = progress_pattern().captures(line)?;
    let bytes: u64 = caps.get(1).unwrap().as_str().parse().ok()?;
    let percent = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(PERCENT_UNKNOWN);
    Some((bytes, percent))
}

/// Resolve a requested output filename against the output directory.
///
/// The filename must be a single normal path component; separators and
/// parent references are rejected.
pub fn output_path(output_dir: &Path, filename: &str) -> Result<PathBuf, RipError> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(output_dir.join(filename)),
        _ => Err(RipError::BadFilename(filename.to_string())),
    }
}

fn ripper_args(ripper: &ToolConfig, track: u32, dest: &Path) -> Vec<String> {
    let track = track.to_string();
    let dest = dest.display().to_string();
    ripper
        .args
        .iter()
        .map(|arg| arg.replace("{track}", &track).replace("{dest}", &dest))
        .collect()
}

/// A running ripper process for one track.
///
/// [`recv`](TrackRip::recv) yields progress until both output streams end;
/// then [`finish`](TrackRip::finish) reaps the tool. On cancellation,
/// [`abort`](TrackRip::abort) kills and reaps it instead.
pub struct TrackRip {
    child: Child,
    progress: mpsc::Receiver<RipProgress>,
    pumps: Vec<JoinHandle<()>>,
}

/// Spawn the ripper for one track, output going to `dest`.
pub fn spawn_track_rip(
    ripper: &ToolConfig,
    track: u32,
    dest: &Path,
) -> Result<TrackRip, RipError> {
    let args = ripper_args(ripper, track, dest);
    let ToolProcess {
        child,
        stdout,
        stderr,
    } = runner::spawn_tool(&ripper.program, &args)?;

    let (tx, progress) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let pumps = vec![
        tokio::spawn(pump_progress(stdout, track, tx.clone())),
        tokio::spawn(pump_progress(stderr, track, tx)),
    ];

    tracing::info!(track, dest = %dest.display(), "Ripper started");
    Ok(TrackRip {
        child,
        progress,
        pumps,
    })
}

impl TrackRip {
    /// Next progress event; `None` once the tool's output has ended.
    pub async fn recv(&mut self) -> Option<RipProgress> {
        self.progress.recv().await
    }

    /// Normal completion: wait for exit and join the pumps.
    pub async fn finish(self) -> io::Result<ExitStatus> {
        let Self {
            mut child,
            progress,
            pumps,
        } = self;
        drop(progress);
        let status = child.wait().await;
        for pump in pumps {
            let _ = pump.await;
        }
        status
    }

    /// Cancellation path: SIGKILL the tool and reap it.
    ///
    /// The pumps are aborted, not drained to EOF: the kill only reaches the
    /// direct child, and a tool that forked keeps the pipe write ends open in
    /// its children. Dropping the readers closes our ends instead.
    pub async fn abort(self) {
        let Self {
            mut child,
            progress,
            pumps,
        } = self;
        drop(progress);
        for pump in &pumps {
            pump.abort();
        }
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "Failed to kill ripper");
        }
        for pump in pumps {
            let _ = pump.await;
        }
    }
}

async fn pump_progress<S>(mut lines: LineStream<S>, track: u32, tx: mpsc::Sender<RipProgress>)
where
    S: AsyncRead + Unpin,
{
    while let Some(line) = lines.next().await {
        let Ok(line) = line else { break };
        if let Some((bytes, percent)) = parse_progress_line(&line) {
            let event = RipProgress {
                track,
                bytes,
                percent,
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }
    tracing::debug!(track, "Progress pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_line_with_percent_parses() {
        assert_eq!(
            parse_progress_line("dump: 1234 bytes written (~56.70%)"),
            Some((1234, 56.70))
        );
    }

    #[test]
    fn progress_line_without_percent_uses_sentinel() {
        assert_eq!(
            parse_progress_line("dump: 1234 bytes written"),
            Some((1234, PERCENT_UNKNOWN))
        );
    }

    #[test]
    fn progress_line_with_garbage_percent_uses_sentinel() {
        assert_eq!(
            parse_progress_line("dump: 88 bytes written (~N/A%)"),
            Some((88, PERCENT_UNKNOWN))
        );
    }

    #[test]
    fn progress_line_with_overflowing_bytes_is_dropped() {
        assert_eq!(
            parse_progress_line("dump: 999999999999999999999 bytes written (~1.0%)"),
            None
        );
    }

    #[test]
    fn informational_lines_produce_no_event() {
        assert_eq!(parse_progress_line("MPlayer 1.5 (Debian), built with gcc"), None);
        assert_eq!(parse_progress_line(""), None);
        assert_eq!(parse_progress_line("dump: almost but not quite"), None);
    }

    #[test]
    fn ripper_args_substitute_track_and_dest() {
        let ripper = ToolConfig::new("/usr/bin/mplayer").with_args([
            "-quiet",
            "-dumpstream",
            "dvd://{track}",
            "-dumpfile",
            "{dest}",
        ]);
        let args = ripper_args(&ripper, 7, Path::new("/srv/rips/out.vob"));
        assert_eq!(
            args,
            vec![
                "-quiet",
                "-dumpstream",
                "dvd://7",
                "-dumpfile",
                "/srv/rips/out.vob"
            ]
        );
    }

    #[test]
    fn output_path_accepts_plain_filenames() {
        let dest = output_path(Path::new("rips"), "movie.vob").unwrap();
        assert_eq!(dest, Path::new("rips").join("movie.vob"));
    }

    #[test]
    fn output_path_rejects_traversal_and_separators() {
        for bad in ["../movie.vob", "a/b.vob", "/etc/passwd", "", ".", ".."] {
            assert!(
                matches!(output_path(Path::new("rips"), bad), Err(RipError::BadFilename(_))),
                "expected rejection for {bad:?}"
            );
        }
    }

    fn fake_ripper(body: &str) -> ToolConfig {
        ToolConfig::new("/bin/sh").with_args(["-c", body])
    }

    #[tokio::test]
    async fn track_rip_streams_progress_then_closes() {
        let ripper = fake_ripper(
            "printf 'Starting dump...\\n'; \
             printf 'dump: 100 bytes written (~3.10%%)\\r'; \
             printf 'dump: 200 bytes written (~6.20%%)\\r'; \
             printf 'dump: 300 bytes written\\n'",
        );
        let mut rip = spawn_track_rip(&ripper, 4, Path::new("/tmp/unused.vob")).unwrap();

        let mut events = Vec::new();
        while let Some(event) = rip.recv().await {
            events.push(event);
        }

        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.track == 4));
        assert_eq!(events[0].bytes, 100);
        assert_eq!(events[1].percent, 6.20);
        assert_eq!(events[2].percent, PERCENT_UNKNOWN);
        assert!(rip.finish().await.unwrap().success());
    }

    #[tokio::test]
    async fn track_rip_with_silent_tool_closes_immediately() {
        let mut rip =
            spawn_track_rip(&fake_ripper("exit 0"), 1, Path::new("/tmp/unused.vob")).unwrap();
        assert!(rip.recv().await.is_none());
        assert!(rip.finish().await.unwrap().success());
    }

    #[tokio::test]
    async fn abort_kills_a_running_ripper() {
        let ripper = fake_ripper("printf 'dump: 10 bytes written (~0.10%%)\\n'; sleep 30");
        let mut rip = spawn_track_rip(&ripper, 2, Path::new("/tmp/unused.vob")).unwrap();

        let first = rip.recv().await.unwrap();
        assert_eq!(first.bytes, 10);

        rip.abort().await;
    }

    #[tokio::test]
    async fn abort_does_not_wait_for_forked_children_holding_the_pipes() {
        // The backgrounded sleep inherits both pipes and outlives the kill.
        let ripper = fake_ripper("sleep 30 & printf 'dump: 10 bytes written\\n'; sleep 30");
        let mut rip = spawn_track_rip(&ripper, 3, Path::new("/tmp/unused.vob")).unwrap();

        let first = rip.recv().await.unwrap();
        assert_eq!(first.bytes, 10);

        tokio::time::timeout(std::time::Duration::from_secs(3), rip.abort())
            .await
            .expect("abort blocked on the forked child's pipes");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let ripper = ToolConfig::new("/nonexistent/mplayer");
        assert!(matches!(
            spawn_track_rip(&ripper, 1, Path::new("/tmp/x.vob")),
            Err(RipError::Spawn(_))
        ));
    }
}
