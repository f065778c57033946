//! Disc-inspection output parser.
//!
//! Pure line classifier over lsdvd-style output: three patterns tried in
//! precedence order (disc title, per-track summary, longest track), first
//! match wins. Parsing is best effort. An unrecognized line or a bad numeric
//! field flips `parse_ok` and skips that line, but never discards tracks that
//! already parsed.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One title row of the inspection output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: u32,
    /// Formatted duration as printed by the tool, e.g. `00:49:17.000`.
    pub length: String,
    pub chapters: u32,
    pub cells: u32,
    pub audio_streams: u32,
    pub subpictures: u32,
}

/// Structured result of one disc scan; the payload of the `scan` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscRecord {
    /// Disc title string, empty if the tool never printed one.
    pub id: String,
    pub longest_track: u32,
    pub tracks: Vec<TrackRecord>,
    /// False if any output line failed to classify or parse.
    pub parse_ok: bool,
}

fn title_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^Disc Title: (.+)$").unwrap())
}

fn track_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Real tool output has no comma between the length value and "Chapters".
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^Title: (\d+), Length: (\d+:\d+:\d+\.\d+) Chapters: (\d+), Cells: (\d+), Audio streams: (\d+), Subpictures: (\d+)$",
        )
        .unwrap()
    })
}

fn longest_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^Longest track: (\d+)$").unwrap())
}

/// Parse inspection output into a [`DiscRecord`].
///
/// Output order of `tracks` matches input line order; no re-sorting.
pub fn parse_disc_output<'a, I>(lines: I) -> DiscRecord
where
    I: IntoIterator<Item = &'a str>,
{
    let mut record = DiscRecord {
        id: String::new(),
        longest_track: 0,
        tracks: Vec::new(),
        parse_ok: true,
    };

    for line in lines {
        if let Some(caps) = title_pattern().captures(line) {
            record.id = caps.get(1).unwrap().as_str().to_string();
        } else if let Some(caps) = track_pattern().captures(line) {
            match parse_track(&caps) {
                Ok(track) => record.tracks.push(track),
                Err(field) => {
                    tracing::warn!(line, field, "Track line has unparseable numeric field");
                    record.parse_ok = false;
                }
            }
        } else if let Some(caps) = longest_pattern().captures(line) {
            match caps.get(1).unwrap().as_str().parse() {
                Ok(n) => record.longest_track = n,
                Err(_) => {
                    tracing::warn!(line, "Longest-track line has unparseable index");
                    record.parse_ok = false;
                }
            }
        } else {
            tracing::warn!(line, "Unclassified inspection line");
            record.parse_ok = false;
        }
    }

    record
}

fn parse_track(caps: &regex::Captures<'_>) -> Result<TrackRecord, &'static str> {
    let num = |i: usize, field: &'static str| {
        caps.get(i).unwrap().as_str().parse::<u32>().map_err(|_| field)
    };
    Ok(TrackRecord {
        id: num(1, "id")?,
        length: caps.get(2).unwrap().as_str().to_string(),
        chapters: num(3, "chapters")?,
        cells: num(4, "cells")?,
        audio_streams: num(5, "audio streams")?,
        subpictures: num(6, "subpictures")?,
    })
}
