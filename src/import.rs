//! MIDI → MusicXML import pipeline.
//!
//! decode → controller velocity scaling → quantization → part grouping →
//! staff split → voice allocation → measure segmentation → part assembly →
//! document text.  Nothing here returns an error: fatal problems end the
//! import with `ok: false`, everything else is collected as warnings.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::assembler::{build_part, segment_notes, PartDefinition, ScoreLayout, MAX_MEASURES};
use crate::error::{Diagnostic, DiagnosticCode, Result};
use crate::model::Score;
use crate::options::ImportOptions;
use crate::quantize::{allocate_auto_voices, apply_controller_velocity_scale, quantize, QuantizedNote};
use crate::smf::{self, DecodedSmf, ProgramEvent};
use crate::writer::{write_musicxml, WriterOptions};

const DRUM_CHANNEL: u8 = 10;

/// Below this pitch a part counts as reaching into the bass staff.
const LOW_REACH: u8 = 55;
/// At or above this pitch a part counts as reaching into the treble staff.
const HIGH_REACH: u8 = 65;
/// Split point for two-staff parts: lower notes go to staff 2.
const STAFF_SPLIT: u8 = 60;

/// Outcome of one import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub ok: bool,
    /// MusicXML text, present iff `ok`
    pub document: Option<String>,
    /// Fatal diagnostics; empty iff `ok`
    pub diagnostics: Vec<Diagnostic>,
    /// Advisory warnings
    pub warnings: Vec<Diagnostic>,
}

impl ImportResult {
    fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            ok: false,
            document: None,
            diagnostics,
            warnings: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether any warning of `code` was recorded.
    pub fn has_warning(&self, code: DiagnosticCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}

/// Notes of one output part before assembly.
struct PartGroup {
    name: String,
    channel: u8,
    program: Option<u8>,
    percussion: bool,
    notes: Vec<QuantizedNote>,
}

/// Convert SMF bytes to a MusicXML document.
pub fn import_midi(data: &[u8], options: &ImportOptions) -> ImportResult {
    let decoded = match smf::decode(data) {
        Ok(decoded) => decoded,
        Err(diagnostics) => {
            info!("import failed: {:?}", diagnostics.iter().map(|d| d.code).collect::<Vec<_>>());
            return ImportResult::failed(diagnostics);
        }
    };
    let DecodedSmf {
        header,
        notes,
        controllers,
        metas,
        programs,
        track_names,
        mut warnings,
    } = decoded;
    let tpq = header.ticks_per_quarter;

    let notes = apply_controller_velocity_scale(notes, &controllers);
    let (notes, quantize_warnings) = quantize(&notes, tpq, options.grid);
    warnings.extend(quantize_warnings);

    let max_end = notes.iter().map(|n| n.end_tick).max().unwrap_or(0);
    let layout = ScoreLayout::new(tpq, options.grid.subdivision(), &metas, max_end);
    let notes = drop_past_layout(notes, &layout, &mut warnings);
    let groups = group_parts(notes, &track_names, &programs, &mut warnings);

    let mut score = Score {
        title: Some(options.title.clone()),
        version: Some("3.1".to_string()),
        software: Some("scorelib".to_string()),
        ..Default::default()
    };

    for (index, group) in groups.into_iter().enumerate() {
        let id = format!("P{}", index + 1);
        let mut segments = Vec::new();
        for (staff, staff_notes) in split_staves(group.notes, group.percussion) {
            let (clusters, voice_warnings) = allocate_auto_voices(staff_notes);
            warnings.extend(voice_warnings);
            segments.extend(segment_notes(&clusters, staff, &layout));
        }
        debug!(
            "part {id} ({}): channel {}, {} segments",
            group.name,
            group.channel,
            segments.len()
        );

        let definition = PartDefinition {
            id,
            name: group.name,
            channel: group.channel,
            program: group.program,
            percussion: group.percussion,
            tempo_directions: index == 0,
            segments,
        };
        let (part, part_warnings) = build_part(&definition, &layout);
        warnings.extend(part_warnings);
        score.parts.push(part);
    }

    let document = write_musicxml(
        &score,
        &WriterOptions {
            pretty: options.pretty,
            debug_metadata: options.debug_metadata,
        },
    );
    info!(
        "imported {} parts, {} measures, {} warnings",
        score.parts.len(),
        layout.measures.len(),
        warnings.len()
    );

    ImportResult {
        ok: true,
        document: Some(document),
        diagnostics: Vec::new(),
        warnings,
    }
}

/// Notes starting after the last measure of a capped grid are dropped.
fn drop_past_layout(
    notes: Vec<QuantizedNote>,
    layout: &ScoreLayout,
    warnings: &mut Vec<Diagnostic>,
) -> Vec<QuantizedNote> {
    let end = layout.end_tick();
    let before = notes.len();
    let kept: Vec<QuantizedNote> = notes.into_iter().filter(|n| n.start_tick < end).collect();
    if kept.len() < before {
        warnings.push(Diagnostic::warning(
            DiagnosticCode::EventDropped,
            format!(
                "{} notes start past measure {MAX_MEASURES} (tick {end}) and were dropped",
                before - kept.len()
            ),
        ));
    }
    kept
}

/// One part per (track, channel); channel-10 notes always get their own
/// percussion part.  A file without notes still yields one empty part.
fn group_parts(
    notes: Vec<QuantizedNote>,
    track_names: &HashMap<usize, String>,
    programs: &[ProgramEvent],
    warnings: &mut Vec<Diagnostic>,
) -> Vec<PartGroup> {
    let mut by_key: BTreeMap<(usize, u8), Vec<QuantizedNote>> = BTreeMap::new();
    for note in notes {
        by_key.entry((note.track_index, note.channel)).or_default().push(note);
    }

    let mut channels_per_track: BTreeMap<usize, BTreeSet<u8>> = BTreeMap::new();
    for &(track, channel) in by_key.keys() {
        channels_per_track.entry(track).or_default().insert(channel);
    }
    for (track, channels) in &channels_per_track {
        if channels.contains(&DRUM_CHANNEL) && channels.len() > 1 {
            warnings.push(Diagnostic::warning(
                DiagnosticCode::DrumChannelSeparated,
                format!("track {track}: channel 10 notes moved to a separate percussion part"),
            ));
        }
    }

    let mut groups: Vec<PartGroup> = by_key
        .into_iter()
        .map(|((track, channel), notes)| {
            let percussion = channel == DRUM_CHANNEL;
            let shared = channels_per_track.get(&track).map_or(false, |c| c.len() > 1);
            let base = track_names
                .get(&track)
                .filter(|n| !n.trim().is_empty())
                .map(|n| n.trim().to_string());
            let name = match (base, percussion, shared) {
                (Some(name), _, false) => name,
                (Some(name), false, true) => format!("{name} (channel {channel})"),
                (_, true, _) => "Drums".to_string(),
                (None, false, false) => format!("Track {}", track + 1),
                (None, false, true) => format!("Track {} (channel {channel})", track + 1),
            };
            let program = programs
                .iter()
                .find(|p| p.track_index == track && p.channel == channel)
                .map(|p| p.program);
            PartGroup {
                name,
                channel,
                program: if percussion { None } else { program },
                percussion,
                notes,
            }
        })
        .collect();

    if groups.is_empty() {
        groups.push(PartGroup {
            name: "Track 1".to_string(),
            channel: 1,
            program: None,
            percussion: false,
            notes: Vec::new(),
        });
    }
    groups
}

/// Wide pitched parts go onto a grand staff; everything else stays on
/// staff 1.
fn split_staves(notes: Vec<QuantizedNote>, percussion: bool) -> Vec<(u32, Vec<QuantizedNote>)> {
    let wide = !percussion
        && notes.iter().any(|n| n.pitch < LOW_REACH)
        && notes.iter().any(|n| n.pitch >= HIGH_REACH);
    if !wide {
        return vec![(1, notes)];
    }
    let (lower, upper): (Vec<_>, Vec<_>) = notes.into_iter().partition(|n| n.pitch < STAFF_SPLIT);
    vec![(1, upper), (2, lower)]
}
