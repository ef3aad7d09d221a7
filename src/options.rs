//! Import and export options.
//!
//! Both option sets are plain serde structs so hosts can hand them over as
//! JSON; every field has a default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::quantize::QuantizeGrid;

/// Ticks per quarter note in MIDI output unless overridden.
pub const TICKS_PER_QUARTER: u16 = 480;

// ─── Import ──────────────────────────────────────────────────────────

/// Options for MIDI → MusicXML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Quantization grid
    pub grid: QuantizeGrid,
    /// Written into `<work-title>`
    pub title: String,
    /// Embed source ticks, velocity, track and channel as a comment per note
    pub debug_metadata: bool,
    /// Indent the output document
    pub pretty: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            grid: QuantizeGrid::Sixteenth,
            title: "Imported MIDI".to_string(),
            debug_metadata: false,
            pretty: true,
        }
    }
}

impl ImportOptions {
    /// Load options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ─── Export ──────────────────────────────────────────────────────────

/// How much notation is turned into performance detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Plain notated pitches and durations for quick audition
    Playback,
    /// Full articulation, ornament, grace, tie and dynamics handling
    #[default]
    Midi,
}

/// Where grace notes take their time from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraceTimingMode {
    /// Graces end on the beat; the principal keeps its start
    #[default]
    BeforeBeat,
    /// Graces start on the beat and delay the principal
    OnBeat,
    /// Graces and principal split the principal's length equally
    ClassicalEqual,
}

/// Strength of the metric accent pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccentProfile {
    Subtle,
    #[default]
    Balanced,
    Strong,
}

impl AccentProfile {
    /// Velocity bonus for (strong, medium) beats.
    pub fn deltas(self) -> (i32, i32) {
        match self {
            AccentProfile::Subtle => (4, 2),
            AccentProfile::Balanced => (8, 4),
            AccentProfile::Strong => (12, 6),
        }
    }
}

/// Options for score → events → MIDI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub mode: PlaybackMode,
    pub grace_timing: GraceTimingMode,
    /// Add beat-position velocity accents (midi mode only)
    pub metric_accent: bool,
    pub accent_profile: AccentProfile,
    pub ticks_per_quarter: u16,
    /// 0-based GM program per track id, ahead of any other source
    pub program_overrides: BTreeMap<String, u8>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            mode: PlaybackMode::Midi,
            grace_timing: GraceTimingMode::BeforeBeat,
            metric_accent: false,
            accent_profile: AccentProfile::Balanced,
            ticks_per_quarter: TICKS_PER_QUARTER,
            program_overrides: BTreeMap::new(),
        }
    }
}

impl ExportOptions {
    /// Load options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
