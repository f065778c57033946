//! Command-line panel for a ripdeck station.
//!
//! One subcommand per station command. `rip` stays connected and renders
//! progress until every requested track completes or the job is interrupted;
//! `watch` dumps the raw event stream.

use std::fmt::Write as _;
use std::io::Write as _;
use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use ripdeck::wire::codec::JsonCodec;
use ripdeck::wire::protocol::{self, Envelope};
use ripdeck::{DiscRecord, RipProgress, RipTrack};

#[derive(Parser, Debug)]
#[command(
    name = "ripctl",
    version,
    about = "Command-line panel for a ripdeck station"
)]
struct Cli {
    /// Station control address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect the disc in the drive.
    Scan,
    /// Rip tracks; each entry is TRACK:FILENAME, e.g. `1:pilot.vob`.
    Rip {
        #[arg(required = true)]
        tracks: Vec<String>,
    },
    /// Cancel the rip currently in progress.
    Interrupt,
    /// Eject the disc tray.
    Eject,
    /// Delete everything in the station's output directory.
    Tidy,
    /// Stream raw station events to stdout.
    Watch,
}

type Panel = Framed<TcpStream, JsonCodec<Envelope>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let stream = TcpStream::connect(cli.addr)
        .await
        .with_context(|| format!("connect {}", cli.addr))?;
    let mut panel = Framed::new(stream, JsonCodec::new());

    match cli.cmd {
        Command::Scan => scan(&mut panel).await,
        Command::Rip { tracks } => rip(&mut panel, &tracks).await,
        Command::Interrupt => send(&mut panel, Envelope::empty(protocol::CMD_INTERRUPT)).await,
        Command::Eject => eject(&mut panel).await,
        Command::Tidy => send(&mut panel, Envelope::empty(protocol::CMD_TIDY)).await,
        Command::Watch => watch(&mut panel).await,
    }
}

async fn send(panel: &mut Panel, envelope: Envelope) -> Result<()> {
    panel.send(envelope).await.context("send command")
}

/// Next station event, skipping free-space telemetry. Bails on `error`
/// events and on connection loss.
async fn next_event(panel: &mut Panel) -> Result<Envelope> {
    loop {
        let event = match panel.next().await {
            Some(frame) => frame
                .context("read event")?
                .context("station sent a malformed frame")?,
            None => bail!("station closed the connection"),
        };
        if event.cmd == protocol::EVT_FREESPACE {
            continue;
        }
        if event.cmd == protocol::EVT_ERROR {
            let message: String = event.decode_payload().unwrap_or_default();
            bail!("station error: {message}");
        }
        return Ok(event);
    }
}

async fn scan(panel: &mut Panel) -> Result<()> {
    send(panel, Envelope::empty(protocol::CMD_SCAN)).await?;
    loop {
        let event = next_event(panel).await?;
        if event.cmd == protocol::EVT_SCAN {
            let record: DiscRecord = event.decode_payload().context("decode scan payload")?;
            print!("{}", render_disc(&record));
            return Ok(());
        }
    }
}

fn render_disc(disc: &DiscRecord) -> String {
    let mut out = String::new();
    let title = if disc.id.is_empty() {
        "(untitled)"
    } else {
        &disc.id
    };
    let _ = writeln!(out, "Disc: {} ({} tracks)", title, disc.tracks.len());
    for track in &disc.tracks {
        let marker = if track.id == disc.longest_track {
            '*'
        } else {
            ' '
        };
        let _ = writeln!(
            out,
            "{} {:>2}  {}  {} chapters, {} audio",
            marker, track.id, track.length, track.chapters, track.audio_streams
        );
    }
    if !disc.parse_ok {
        let _ = writeln!(out, "warning: some inspector output could not be parsed");
    }
    out
}

fn parse_track_spec(spec: &str) -> Result<RipTrack> {
    let (track, filename) = spec
        .split_once(':')
        .with_context(|| format!("bad track spec {spec:?}, expected TRACK:FILENAME"))?;
    let track: u32 = track
        .parse()
        .with_context(|| format!("bad track number in {spec:?}"))?;
    if filename.is_empty() {
        bail!("empty filename in {spec:?}");
    }
    Ok(RipTrack {
        track,
        filename: filename.to_string(),
    })
}

async fn rip(panel: &mut Panel, specs: &[String]) -> Result<()> {
    let tracks = specs
        .iter()
        .map(|spec| parse_track_spec(spec))
        .collect::<Result<Vec<_>>>()?;
    let payload = serde_json::to_value(&tracks).context("encode rip request")?;
    send(panel, Envelope::new(protocol::CMD_RIP, payload)).await?;

    let mut remaining = tracks.len();
    while remaining > 0 {
        let event = next_event(panel).await?;
        match event.cmd.as_str() {
            protocol::EVT_RIP_STARTED => {
                let track: RipTrack = event.decode_payload().context("decode rip-started")?;
                println!("Ripping track {} -> {}", track.track, track.filename);
            }
            protocol::EVT_RIP_PROGRESS => {
                let progress: RipProgress =
                    event.decode_payload().context("decode rip-progress")?;
                if progress.percent < 0.0 {
                    print!("\r  {} bytes", progress.bytes);
                } else {
                    print!("\r  {} bytes ({:.2}%)", progress.bytes, progress.percent);
                }
                std::io::stdout().flush().ok();
            }
            protocol::EVT_RIP_COMPLETED => {
                let track: RipTrack = event.decode_payload().context("decode rip-completed")?;
                println!("\r{:<50}", format!("Track {} complete", track.track));
                remaining -= 1;
            }
            protocol::EVT_RIP_INTERRUPTED => {
                let track: RipTrack =
                    event.decode_payload().context("decode rip-interrupted")?;
                println!("\r{:<50}", format!("Track {} interrupted", track.track));
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn eject(panel: &mut Panel) -> Result<()> {
    send(panel, Envelope::empty(protocol::CMD_EJECT)).await?;
    loop {
        if next_event(panel).await?.cmd == protocol::EVT_EJECT_SUCCESS {
            println!("Tray ejected");
            return Ok(());
        }
    }
}

async fn watch(panel: &mut Panel) -> Result<()> {
    while let Some(frame) = panel.next().await {
        let event = frame
            .context("read event")?
            .context("station sent a malformed frame")?;
        println!("{} {}", event.cmd, event.payload);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripdeck::TrackRecord;

    #[test]
    fn track_spec_parses_number_and_filename() {
        let track = parse_track_spec("3:episode.vob").unwrap();
        assert_eq!(track.track, 3);
        assert_eq!(track.filename, "episode.vob");
    }

    #[test]
    fn track_spec_keeps_colons_in_filename() {
        let track = parse_track_spec("1:odd:name.vob").unwrap();
        assert_eq!(track.track, 1);
        assert_eq!(track.filename, "odd:name.vob");
    }

    #[test]
    fn track_spec_rejects_missing_separator() {
        assert!(parse_track_spec("episode.vob").is_err());
    }

    #[test]
    fn track_spec_rejects_non_numeric_track() {
        assert!(parse_track_spec("x:episode.vob").is_err());
    }

    #[test]
    fn track_spec_rejects_empty_filename() {
        assert!(parse_track_spec("1:").is_err());
    }

    #[test]
    fn disc_rendering_marks_longest_track() {
        let disc = DiscRecord {
            id: "TEST_DISC".to_string(),
            longest_track: 1,
            tracks: vec![
                TrackRecord {
                    id: 1,
                    length: "00:42:00.000".to_string(),
                    chapters: 6,
                    cells: 6,
                    audio_streams: 2,
                    subpictures: 1,
                },
                TrackRecord {
                    id: 2,
                    length: "00:04:31.000".to_string(),
                    chapters: 2,
                    cells: 2,
                    audio_streams: 1,
                    subpictures: 0,
                },
            ],
            parse_ok: true,
        };

        let rendered = render_disc(&disc);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Disc: TEST_DISC (2 tracks)");
        assert_eq!(lines[1], "*  1  00:42:00.000  6 chapters, 2 audio");
        assert_eq!(lines[2], "   2  00:04:31.000  2 chapters, 1 audio");
    }

    #[test]
    fn disc_rendering_flags_parse_degradation() {
        let disc = DiscRecord {
            id: String::new(),
            longest_track: 0,
            tracks: Vec::new(),
            parse_ok: false,
        };

        let rendered = render_disc(&disc);
        assert!(rendered.starts_with("Disc: (untitled) (0 tracks)\n"));
        assert!(rendered.contains("warning"));
    }
}
