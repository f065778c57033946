//! Station configuration.
//!
//! Every runtime knob lives in one struct built at startup and passed down:
//! listen addresses, the output directory, the external tools. No
//! process-wide configuration state; sessions are testable against a config
//! pointing at scripted fake tools.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// An external tool: program path plus fixed argument list.
///
/// The ripper's argument list is a template: `{track}` and `{dest}` are
/// substituted per track before spawning.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Full daemon configuration.
///
/// Defaults reproduce the classic deployment: lsdvd/mplayer/eject against a
/// DVD drive, rip output under `rips/`.
#[derive(Debug, Clone)]
pub struct StationConfig {
    /// Control-protocol listener (persistent client connections).
    pub control_addr: SocketAddr,
    /// Operational HTTP listener (health, shutdown).
    pub ops_addr: SocketAddr,
    /// Directory rip output is written to; also the volume telemetry samples.
    pub output_dir: PathBuf,
    pub inspector: ToolConfig,
    pub ripper: ToolConfig,
    pub eject: ToolConfig,
    /// Cadence of free-space telemetry pushes.
    pub telemetry_interval: Duration,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            control_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ops_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            output_dir: PathBuf::from("rips"),
            inspector: ToolConfig::new("/usr/bin/lsdvd"),
            ripper: ToolConfig::new("/usr/bin/mplayer").with_args([
                "-quiet",
                "-nocache",
                "-dumpstream",
                "dvd://{track}",
                "-dumpfile",
                "{dest}",
            ]),
            eject: ToolConfig::new("/usr/bin/eject"),
            telemetry_interval: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ripper_args_carry_substitution_placeholders() {
        let config = StationConfig::default();
        assert!(config.ripper.args.iter().any(|a| a.contains("{track}")));
        assert!(config.ripper.args.iter().any(|a| a.contains("{dest}")));
    }

    #[test]
    fn tool_config_builder_collects_args() {
        let tool = ToolConfig::new("/bin/echo").with_args(["a", "b"]);
        assert_eq!(tool.program, PathBuf::from("/bin/echo"));
        assert_eq!(tool.args, vec!["a".to_string(), "b".to_string()]);
    }
}
