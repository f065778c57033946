//! External tool invocation.
//!
//! Every collaborator of the station (disc inspector, ripper, eject) is a
//! plain subprocess. This module spawns them with piped output and exposes
//! stdout/stderr as line streams; the child handle stays public so callers
//! can reap or kill the tool directly.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to run {program}: {source}")]
    Run {
        program: String,
        source: io::Error,
    },
    #[error("{stream} not captured for {program}")]
    MissingPipe {
        program: String,
        stream: &'static str,
    },
}

/// Cap on buffered line length. A tool emitting endless output with no line
/// break errors the stream out instead of growing the buffer without bound.
const MAX_LINE_LEN: usize = 64 * 1024;

/// Line splitter for tool output, yielding on `\n` or a bare `\r`.
///
/// The ripping tool rewrites its progress line in place with carriage returns
/// and no newline; a plain newline codec would buffer the whole run and emit
/// one giant line at EOF. A `\r\n` pair counts as a single boundary, even when
/// the two bytes arrive in different reads. Lines longer than
/// [`MAX_LINE_LEN`] are an error.
#[derive(Debug)]
pub struct LineCodec {
    trailing_cr: bool,
    max_length: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self {
            trailing_cr: false,
            max_length: MAX_LINE_LEN,
        }
    }
}

impl LineCodec {
    fn overlong(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {} bytes", self.max_length),
        )
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if self.trailing_cr {
            if src.is_empty() {
                return Ok(None);
            }
            if src[0] == b'\n' {
                src.advance(1);
            }
            self.trailing_cr = false;
        }

        let Some(pos) = src.iter().position(|&b| b == b'\n' || b == b'\r') else {
            if src.len() > self.max_length {
                return Err(self.overlong());
            }
            return Ok(None);
        };
        if pos > self.max_length {
            return Err(self.overlong());
        }
        let sep_is_cr = src[pos] == b'\r';
        let line = src.split_to(pos);
        src.advance(1);
        if sep_is_cr {
            if src.first() == Some(&b'\n') {
                src.advance(1);
            } else if src.is_empty() {
                self.trailing_cr = true;
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                let rest = src.split_to(src.len());
                Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
            }
        }
    }
}

/// Line stream over one captured output pipe.
pub type LineStream<S> = FramedRead<S, LineCodec>;

/// A spawned tool with both output streams captured.
#[derive(Debug)]
pub struct ToolProcess {
    pub child: Child,
    pub stdout: LineStream<ChildStdout>,
    pub stderr: LineStream<ChildStderr>,
}

impl ToolProcess {
    /// Wait for the tool to exit and return its status.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }
}

/// Spawn a tool with stdout and stderr captured as line streams.
pub fn spawn_tool(program: &Path, args: &[String]) -> Result<ToolProcess, SpawnError> {
    let program_name = program.display().to_string();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SpawnError::Run {
            program: program_name.clone(),
            source,
        })?;

    let stdout = child.stdout.take().ok_or_else(|| SpawnError::MissingPipe {
        program: program_name.clone(),
        stream: "stdout",
    })?;
    let stderr = child.stderr.take().ok_or_else(|| SpawnError::MissingPipe {
        program: program_name.clone(),
        stream: "stderr",
    })?;

    tracing::debug!(program = %program_name, ?args, "Spawned tool");

    Ok(ToolProcess {
        child,
        stdout: FramedRead::new(stdout, LineCodec::default()),
        stderr: FramedRead::new(stderr, LineCodec::default()),
    })
}

/// Run a tool to completion with no captured output; returns its exit status.
pub async fn run_status(program: &Path, args: &[String]) -> Result<ExitStatus, SpawnError> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|source| SpawnError::Run {
            program: program.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    fn decode_all(codec: &mut LineCodec, input: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(input);
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            lines.push(line);
        }
        while let Some(line) = codec.decode_eof(&mut buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn line_codec_splits_on_newline() {
        let mut codec = LineCodec::default();
        assert_eq!(decode_all(&mut codec, b"one\ntwo\n"), vec!["one", "two"]);
    }

    #[test]
    fn line_codec_splits_on_bare_carriage_return() {
        let mut codec = LineCodec::default();
        assert_eq!(
            decode_all(&mut codec, b"dump: 1 bytes written\rdump: 2 bytes written\r"),
            vec!["dump: 1 bytes written", "dump: 2 bytes written"]
        );
    }

    #[test]
    fn line_codec_treats_crlf_as_one_boundary() {
        let mut codec = LineCodec::default();
        assert_eq!(decode_all(&mut codec, b"one\r\ntwo\r\n"), vec!["one", "two"]);
    }

    #[test]
    fn line_codec_handles_crlf_split_across_reads() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"one\r"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "one");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\ntwo\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "two");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn line_codec_flushes_unterminated_tail_at_eof() {
        let mut codec = LineCodec::default();
        assert_eq!(decode_all(&mut codec, b"one\npartial"), vec!["one", "partial"]);
    }

    #[test]
    fn line_codec_accepts_a_line_at_the_cap() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'y'; MAX_LINE_LEN]);
        buf.extend_from_slice(b"\n");
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LEN);
    }

    #[test]
    fn line_codec_rejects_an_overlong_line() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'x'; MAX_LINE_LEN + 1]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn spawn_tool_streams_stdout_lines() {
        let mut tool = spawn_tool(&sh(), &["-c".into(), "printf 'a\\nb\\n'".into()]).unwrap();
        let mut lines = Vec::new();
        while let Some(line) = tool.stdout.next().await {
            lines.push(line.unwrap());
        }
        assert_eq!(lines, vec!["a", "b"]);
        assert!(tool.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn spawn_tool_streams_carriage_return_lines() {
        let mut tool = spawn_tool(&sh(), &["-c".into(), "printf 'p1\\rp2\\r'".into()]).unwrap();
        let mut lines = Vec::new();
        while let Some(line) = tool.stdout.next().await {
            lines.push(line.unwrap());
        }
        assert_eq!(lines, vec!["p1", "p2"]);
        assert!(tool.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn spawn_tool_captures_stderr() {
        let mut tool = spawn_tool(&sh(), &["-c".into(), "echo oops >&2".into()]).unwrap();
        let line = tool.stderr.next().await.unwrap().unwrap();
        assert_eq!(line, "oops");
        tool.wait().await.unwrap();
    }

    #[tokio::test]
    async fn spawn_tool_missing_program_errors() {
        let err = spawn_tool(Path::new("/nonexistent/ripdeck-tool"), &[]).unwrap_err();
        assert!(matches!(err, SpawnError::Run { .. }));
    }

    #[tokio::test]
    async fn run_status_reports_exit_code() {
        let ok = run_status(&sh(), &["-c".into(), "exit 0".into()]).await.unwrap();
        assert!(ok.success());
        let bad = run_status(&sh(), &["-c".into(), "exit 3".into()]).await.unwrap();
        assert_eq!(bad.code(), Some(3));
    }
}
