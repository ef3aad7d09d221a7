//! Score assembler: turns voice-allocated notes into MusicXML parts.
//!
//! The import pipeline first lays out a measure grid shared by every part
//! ([`ScoreLayout`]), cuts each voice cluster into per-measure
//! [`NoteSegment`]s, then calls [`build_part`] once per part.  Inside a
//! measure every (staff, voice) lane is written left to right with rests
//! filling the gaps, lanes separated by `<backup>`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::drums;
use crate::duration::{self, DurationNotation};
use crate::error::{Diagnostic, DiagnosticCode};
use crate::model::*;
use crate::quantize::VoiceCluster;
use crate::smf::MetaEvent;

// ═══════════════════════════════════════════════════════════════════════
// Inputs
// ═══════════════════════════════════════════════════════════════════════

/// One voice-cluster note, or the part of it that falls in one measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NoteSegment {
    pub measure_index: usize,
    pub voice: u32,
    /// 1 = treble, 2 = bass; always 1 for percussion
    pub staff: u32,
    /// Offset from the start of the measure, in divisions
    pub start_div: u64,
    pub dur_div: u64,
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
    pub track_index: usize,
    /// Source note boundaries in file ticks
    pub start_tick: u64,
    pub end_tick: u64,
    /// Continues into the next measure
    pub tie_start: bool,
    /// Continued from the previous measure
    pub tie_stop: bool,
}

/// Everything needed to write one `<part>`.
#[derive(Debug, Clone)]
pub struct PartDefinition {
    pub id: String,
    pub name: String,
    /// 1-based MIDI channel
    pub channel: u8,
    /// 1-based program
    pub program: Option<u8>,
    pub percussion: bool,
    /// Only the first part carries tempo directions
    pub tempo_directions: bool,
    pub segments: Vec<NoteSegment>,
}

/// A tempo change inside a measure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoMark {
    pub offset_div: u64,
    pub bpm: f64,
}

/// One measure of the shared grid.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureSlot {
    pub start_tick: u64,
    pub start_div: u64,
    pub length_div: u64,
    pub time: TimeSignature,
    /// Time signature differs from the previous measure (or first measure)
    pub time_change: bool,
    pub fifths: i32,
    pub minor: bool,
    pub key_change: bool,
    pub tempos: Vec<TempoMark>,
}

/// Measure grid and resolution shared by all parts of an import.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreLayout {
    pub ticks_per_quarter: u16,
    /// Score divisions per quarter note
    pub divisions: u32,
    pub measures: Vec<MeasureSlot>,
}

/// Upper bound on the measure grid; notes past it are dropped on import.
pub const MAX_MEASURES: usize = 10_000;

const DEFAULT_TIME: TimeSignature = TimeSignature {
    beats: 4,
    beat_type: 4,
};

impl ScoreLayout {
    /// Lay out enough measures to hold `max_end_tick`.
    ///
    /// Divisions start at the grid subdivision and double until every time
    /// signature in the file spans a whole number of divisions.  A time or
    /// key signature takes effect at the first barline at or after its tick.
    pub fn new(
        ticks_per_quarter: u16,
        subdivision: u32,
        metas: &[MetaEvent],
        max_end_tick: u64,
    ) -> Self {
        let mut metas = metas.to_vec();
        metas.sort_by_key(MetaEvent::tick);

        let times: Vec<(u64, TimeSignature)> = metas
            .iter()
            .filter_map(|m| match *m {
                MetaEvent::TimeSignature {
                    tick,
                    beats,
                    beat_type,
                } => Some((
                    tick,
                    TimeSignature {
                        beats: i32::from(beats),
                        beat_type: i32::from(beat_type),
                    },
                )),
                _ => None,
            })
            .collect();
        let keys: Vec<(u64, i32, bool)> = metas
            .iter()
            .filter_map(|m| match *m {
                MetaEvent::KeySignature {
                    tick,
                    fifths,
                    minor,
                } => Some((tick, i32::from(fifths), minor)),
                _ => None,
            })
            .collect();

        let mut divisions = subdivision.max(1);
        let fits = |d: u32, ts: &TimeSignature| {
            (u64::from(d) * 4 * ts.beats as u64) % ts.beat_type as u64 == 0
        };
        while !times.iter().all(|(_, ts)| fits(divisions, ts)) {
            divisions *= 2;
        }

        let mut layout = ScoreLayout {
            ticks_per_quarter,
            divisions,
            measures: Vec::new(),
        };

        let max_end_div = layout.to_div(max_end_tick);
        let mut start_div = 0u64;
        let mut prev_time = None;
        let mut prev_key = None;
        loop {
            let start_tick = layout.to_tick(start_div);
            let time = times
                .iter()
                .rev()
                .find(|(t, _)| *t <= start_tick)
                .map_or(DEFAULT_TIME, |&(_, ts)| ts);
            let (fifths, minor) = keys
                .iter()
                .rev()
                .find(|(t, _, _)| *t <= start_tick)
                .map_or((0, false), |&(_, f, m)| (f, m));
            let length_div =
                u64::from(divisions) * 4 * time.beats as u64 / time.beat_type as u64;

            layout.measures.push(MeasureSlot {
                start_tick,
                start_div,
                length_div,
                time,
                time_change: prev_time != Some(time),
                fifths,
                minor,
                key_change: prev_key != Some((fifths, minor)),
                tempos: Vec::new(),
            });
            prev_time = Some(time);
            prev_key = Some((fifths, minor));

            start_div += length_div;
            if start_div >= max_end_div {
                break;
            }
            if layout.measures.len() >= MAX_MEASURES {
                log::debug!("measure grid capped at {MAX_MEASURES} measures, tick {max_end_tick} not reached");
                break;
            }
        }

        let mut last_bpm = None;
        for meta in &metas {
            if let MetaEvent::Tempo { tick, bpm } = *meta {
                if last_bpm == Some(bpm) {
                    continue;
                }
                let div = layout.to_div(tick);
                let index = layout.measure_index_at(div);
                let slot = &mut layout.measures[index];
                if div >= slot.start_div + slot.length_div {
                    log::debug!("tempo change at tick {tick} is past the last note, dropped");
                    continue;
                }
                slot.tempos.push(TempoMark {
                    offset_div: div - slot.start_div,
                    bpm,
                });
                last_bpm = Some(bpm);
            }
        }

        log::debug!(
            "layout: {} measures at {} divisions",
            layout.measures.len(),
            layout.divisions
        );
        layout
    }

    /// File ticks → divisions, rounding half up.
    pub fn to_div(&self, tick: u64) -> u64 {
        let tpq = u64::from(self.ticks_per_quarter);
        (tick * u64::from(self.divisions) + tpq / 2) / tpq
    }

    /// Divisions → file ticks, rounding half up.
    pub fn to_tick(&self, div: u64) -> u64 {
        let d = u64::from(self.divisions);
        (div * u64::from(self.ticks_per_quarter) + d / 2) / d
    }

    /// First file tick after the last measure.
    pub fn end_tick(&self) -> u64 {
        self.measures
            .last()
            .map_or(0, |m| self.to_tick(m.start_div + m.length_div))
    }

    /// Index of the measure containing `div` (the last one past the end).
    pub fn measure_index_at(&self, div: u64) -> usize {
        self.measures
            .partition_point(|m| m.start_div <= div)
            .saturating_sub(1)
    }
}

/// Cut one staff's voice clusters at barlines.
pub fn segment_notes(clusters: &[VoiceCluster], staff: u32, layout: &ScoreLayout) -> Vec<NoteSegment> {
    let mut segments = Vec::new();
    let last_index = layout.measures.len().saturating_sub(1);

    for cluster in clusters {
        for note in &cluster.notes {
            let start = layout.to_div(note.start_tick);
            let end = layout.to_div(note.end_tick).max(start + 1);
            let mut pos = start;
            let mut first = true;
            while pos < end {
                let index = layout.measure_index_at(pos);
                let slot = &layout.measures[index];
                let seg_end = end.min(slot.start_div + slot.length_div);
                if seg_end <= pos {
                    break;
                }
                segments.push(NoteSegment {
                    measure_index: index,
                    voice: cluster.voice,
                    staff,
                    start_div: pos - slot.start_div,
                    dur_div: seg_end - pos,
                    pitch: note.pitch,
                    velocity: note.velocity,
                    channel: note.channel,
                    track_index: note.track_index,
                    start_tick: note.start_tick,
                    end_tick: note.end_tick,
                    tie_start: seg_end < end && index < last_index,
                    tie_stop: !first,
                });
                if index >= last_index {
                    break;
                }
                pos = seg_end;
                first = false;
            }
        }
    }

    segments
}

// ═══════════════════════════════════════════════════════════════════════
// Part assembly
// ═══════════════════════════════════════════════════════════════════════

/// Velocity lower bounds for pp..fff; anything below 20 is ppp.
const DYNAMIC_THRESHOLDS: [u8; 7] = [20, 36, 52, 68, 84, 100, 116];

/// Dynamic mark for a velocity.
pub fn dynamics_mark(velocity: u8) -> &'static str {
    let level = DYNAMIC_THRESHOLDS
        .iter()
        .take_while(|&&t| velocity >= t)
        .count();
    DYNAMIC_LEVELS[level].0
}

/// Build one `<part>` from its segments.
///
/// Returns advisory diagnostics for drum pitches outside the GM key map.
pub fn build_part(definition: &PartDefinition, layout: &ScoreLayout) -> (Part, Vec<Diagnostic>) {
    let mut warnings = Vec::new();

    let mut lanes: Vec<(u32, u32)> = definition
        .segments
        .iter()
        .map(|s| (s.staff, s.voice))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if lanes.is_empty() {
        lanes.push((1, 1));
    }

    let instruments = if definition.percussion {
        drum_instruments(definition, &mut warnings)
    } else {
        vec![ScoreInstrument {
            id: format!("{}-I1", definition.id),
            name: definition.name.clone(),
            midi_unpitched: None,
            midi_channel: Some(i32::from(definition.channel)),
            midi_program: definition.program.map(i32::from),
        }]
    };

    let mut by_measure: BTreeMap<usize, Vec<&NoteSegment>> = BTreeMap::new();
    for seg in &definition.segments {
        by_measure.entry(seg.measure_index).or_default().push(seg);
    }

    let mut last_mark: Option<&str> = None;
    let mut measures = Vec::with_capacity(layout.measures.len());
    for (index, slot) in layout.measures.iter().enumerate() {
        let segs = by_measure.get(&index).map(Vec::as_slice).unwrap_or(&[]);
        let mut elements = Vec::new();

        if index == 0 || slot.time_change || slot.key_change {
            elements.push(MeasureElement::Attributes(measure_attributes(
                index, slot, layout, &lanes, definition.percussion,
            )));
        }

        if definition.tempo_directions {
            for tempo in &slot.tempos {
                elements.push(MeasureElement::Direction(Direction {
                    placement: Some("above".to_string()),
                    offset: offset_or_none(tempo.offset_div),
                    metronome: Some(MetronomeMark {
                        beat_unit: "quarter".to_string(),
                        dotted: false,
                        per_minute: tempo.bpm,
                    }),
                    sound: Some(Sound {
                        tempo: Some(tempo.bpm),
                        ..Default::default()
                    }),
                    ..Default::default()
                }));
            }
        }

        // Loudest onset per offset; continuations are not onsets
        let mut onsets: BTreeMap<u64, u8> = BTreeMap::new();
        for seg in segs.iter().filter(|s| !s.tie_stop) {
            let loudest = onsets.entry(seg.start_div).or_insert(0);
            *loudest = (*loudest).max(seg.velocity);
        }
        for (offset, velocity) in onsets {
            let mark = dynamics_mark(velocity);
            if last_mark == Some(mark) {
                continue;
            }
            last_mark = Some(mark);
            let nominal = dynamic_velocity(mark).unwrap_or(velocity);
            let percent = (f64::from(nominal) / FORTE_VELOCITY * 10_000.0).round() / 100.0;
            elements.push(MeasureElement::Direction(Direction {
                placement: Some("below".to_string()),
                offset: offset_or_none(offset),
                dynamics: Some(mark.to_string()),
                sound: Some(Sound {
                    dynamics: Some(percent),
                    ..Default::default()
                }),
                ..Default::default()
            }));
        }

        for (lane_index, &(staff, voice)) in lanes.iter().enumerate() {
            if lane_index > 0 {
                elements.push(MeasureElement::Backup(slot.length_div as i32));
            }
            let mut lane: Vec<&NoteSegment> = segs
                .iter()
                .copied()
                .filter(|s| s.staff == staff && s.voice == voice)
                .collect();
            lane.sort_by_key(|s| (s.start_div, s.pitch));
            let target = LaneTarget {
                voice: lane_index as i32 + 1,
                staff: (lanes.len() > 1).then_some(lane_index as i32 + 1),
                fifths: slot.fifths,
                length: slot.length_div,
                divisions: layout.divisions,
            };
            emit_lane(&mut elements, &lane, &target, definition);
        }

        measures.push(Measure {
            number: index as i32 + 1,
            implicit: false,
            elements,
        });
    }

    log::debug!(
        "part {} '{}': {} lanes, {} segments",
        definition.id,
        definition.name,
        lanes.len(),
        definition.segments.len()
    );

    let part = Part {
        id: definition.id.clone(),
        name: definition.name.clone(),
        abbreviation: None,
        midi_program: definition.program.map(i32::from),
        midi_channel: Some(i32::from(definition.channel)),
        instruments,
        measures,
    };
    (part, warnings)
}

fn offset_or_none(offset: u64) -> Option<i32> {
    (offset > 0).then_some(offset as i32)
}

fn drum_instrument_id(part_id: &str, pitch: u8) -> String {
    format!("{part_id}-I{}", u32::from(pitch) + 1)
}

fn drum_instruments(definition: &PartDefinition, warnings: &mut Vec<Diagnostic>) -> Vec<ScoreInstrument> {
    let pitches: BTreeSet<u8> = definition.segments.iter().map(|s| s.pitch).collect();
    pitches
        .into_iter()
        .map(|pitch| {
            let name = match drums::gm_drum(pitch) {
                Some(sound) => sound.name.to_string(),
                None => {
                    warnings.push(Diagnostic::warning(
                        DiagnosticCode::DrumNoteUnmapped,
                        format!("part {}: drum note {pitch} is not in the GM key map", definition.id),
                    ));
                    format!("Percussion {pitch}")
                }
            };
            ScoreInstrument {
                id: drum_instrument_id(&definition.id, pitch),
                name,
                midi_unpitched: Some(i32::from(pitch) + 1),
                midi_channel: Some(i32::from(definition.channel)),
                midi_program: None,
            }
        })
        .collect()
}

fn measure_attributes(
    index: usize,
    slot: &MeasureSlot,
    layout: &ScoreLayout,
    lanes: &[(u32, u32)],
    percussion: bool,
) -> Attributes {
    let mut attrs = Attributes::default();
    if index == 0 {
        attrs.divisions = Some(layout.divisions as i32);
        if lanes.len() > 1 {
            attrs.staves = Some(lanes.len() as i32);
        }
        attrs.clefs = lanes
            .iter()
            .enumerate()
            .map(|(i, &(staff, _))| {
                let (sign, line) = if percussion {
                    ("percussion", None)
                } else if staff >= 2 {
                    ("F", Some(4))
                } else {
                    ("G", Some(2))
                };
                Clef {
                    number: i as i32 + 1,
                    sign: sign.to_string(),
                    line,
                    octave_change: None,
                }
            })
            .collect();
    }
    if slot.key_change {
        attrs.key = Some(Key {
            fifths: slot.fifths,
            mode: Some(if slot.minor { "minor" } else { "major" }.to_string()),
        });
    }
    if slot.time_change {
        attrs.time = Some(slot.time);
    }
    attrs
}

// ─── Lane emission ───────────────────────────────────────────────────

/// Where and how a lane is written.
struct LaneTarget {
    voice: i32,
    staff: Option<i32>,
    fifths: i32,
    length: u64,
    divisions: u32,
}

/// Notated chunks for a length; a single untyped chunk when no chain exists.
fn chunks(duration: u64, divisions: u32) -> Vec<(u64, Option<DurationNotation>)> {
    let chain = duration::resolve_chain(duration as f64, divisions);
    if chain.is_empty() {
        return vec![(duration, None)];
    }
    chain
        .into_iter()
        .map(|c| (c.divisions.round() as u64, Some(c)))
        .collect()
}

fn push_rests(elements: &mut Vec<MeasureElement>, duration: u64, target: &LaneTarget) {
    for (len, notation) in chunks(duration, target.divisions) {
        elements.push(MeasureElement::Note(Note {
            rest: true,
            duration: len as i32,
            voice: Some(target.voice),
            staff: target.staff,
            note_type: notation.map(|n| n.note_type.to_string()),
            dots: notation.map_or(0, |n| n.dots),
            ..Default::default()
        }));
    }
}

fn emit_lane(
    elements: &mut Vec<MeasureElement>,
    lane: &[&NoteSegment],
    target: &LaneTarget,
    definition: &PartDefinition,
) {
    if lane.is_empty() {
        elements.push(MeasureElement::Note(Note {
            rest: true,
            measure_rest: true,
            duration: target.length as i32,
            voice: Some(target.voice),
            staff: target.staff,
            ..Default::default()
        }));
        return;
    }

    let mut carry: HashMap<(&'static str, i32), i32> = HashMap::new();
    let mut cursor = 0u64;
    let mut index = 0;
    while index < lane.len() {
        let onset = lane[index].start_div;
        let group_len = lane[index..]
            .iter()
            .take_while(|s| s.start_div == onset)
            .count();
        let chord = &lane[index..index + group_len];
        index += group_len;

        let start = onset.max(cursor);
        let end = chord
            .iter()
            .map(|s| s.start_div + s.dur_div)
            .max()
            .unwrap_or(start)
            .min(target.length);
        if end <= start {
            continue;
        }
        if start > cursor {
            push_rests(elements, start - cursor, target);
        }

        // Spell once per member so every tied chunk repeats it
        let spelled: Vec<(Option<Pitch>, Option<Unpitched>, Option<String>)> = chord
            .iter()
            .map(|seg| spell_member(seg, target.fifths, &mut carry, definition))
            .collect();

        let pieces = chunks(end - start, target.divisions);
        let last = pieces.len() - 1;
        for (j, (len, notation)) in pieces.into_iter().enumerate() {
            for (k, (seg, (pitch, unpitched, accidental))) in chord.iter().zip(&spelled).enumerate() {
                elements.push(MeasureElement::Note(Note {
                    pitch: pitch.clone(),
                    unpitched: unpitched.clone(),
                    instrument: definition
                        .percussion
                        .then(|| drum_instrument_id(&definition.id, seg.pitch)),
                    duration: len as i32,
                    voice: Some(target.voice),
                    staff: target.staff,
                    note_type: notation.map(|n| n.note_type.to_string()),
                    dots: notation.map_or(0, |n| n.dots),
                    chord: k > 0,
                    accidental: accidental.clone(),
                    tie_start: j < last || seg.tie_start,
                    tie_stop: j > 0 || seg.tie_stop,
                    comment: Some(format!(
                        "ticks {}-{} velocity {} track {} channel {}",
                        seg.start_tick, seg.end_tick, seg.velocity, seg.track_index, seg.channel
                    )),
                    ..Default::default()
                }));
            }
        }
        cursor = end;
    }

    if cursor < target.length {
        push_rests(elements, target.length - cursor, target);
    }
}

// ─── Pitch spelling ──────────────────────────────────────────────────

const SHARP_SPELLING: [(&str, i32); 12] = [
    ("C", 0),
    ("C", 1),
    ("D", 0),
    ("D", 1),
    ("E", 0),
    ("F", 0),
    ("F", 1),
    ("G", 0),
    ("G", 1),
    ("A", 0),
    ("A", 1),
    ("B", 0),
];

const FLAT_SPELLING: [(&str, i32); 12] = [
    ("C", 0),
    ("D", -1),
    ("D", 0),
    ("E", -1),
    ("E", 0),
    ("F", 0),
    ("G", -1),
    ("G", 0),
    ("A", -1),
    ("A", 0),
    ("B", -1),
    ("B", 0),
];

/// Step, alter and octave for a MIDI pitch; flat names in flat keys.
pub fn spell_pitch(pitch: u8, fifths: i32) -> (&'static str, i32, i32) {
    let table = if fifths < 0 {
        &FLAT_SPELLING
    } else {
        &SHARP_SPELLING
    };
    let (step, alter) = table[usize::from(pitch % 12)];
    (step, alter, i32::from(pitch / 12) - 1)
}

fn accidental_name(alter: i32) -> &'static str {
    match alter {
        1 => "sharp",
        -1 => "flat",
        _ => "natural",
    }
}

fn spell_member(
    seg: &NoteSegment,
    fifths: i32,
    carry: &mut HashMap<(&'static str, i32), i32>,
    definition: &PartDefinition,
) -> (Option<Pitch>, Option<Unpitched>, Option<String>) {
    if definition.percussion {
        let (step, octave) = match drums::gm_drum(seg.pitch) {
            Some(sound) => (sound.display_step, sound.display_octave),
            None => {
                let (step, _, octave) = spell_pitch(seg.pitch, 0);
                (step, octave)
            }
        };
        let unpitched = Unpitched {
            display_step: Some(step.to_string()),
            display_octave: Some(octave),
        };
        return (None, Some(unpitched), None);
    }

    let (step, alter, octave) = spell_pitch(seg.pitch, fifths);
    let expected = carry
        .get(&(step, octave))
        .copied()
        .unwrap_or_else(|| key_signature_alter(fifths, step));
    let accidental = if alter != expected {
        carry.insert((step, octave), alter);
        Some(accidental_name(alter).to_string())
    } else {
        None
    };
    let pitch = Pitch {
        step: step.to_string(),
        octave,
        alter: (alter != 0).then_some(f64::from(alter)),
    };
    (Some(pitch), None, accidental)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn time_sig(tick: u64, beats: u8, beat_type: u8) -> MetaEvent {
        MetaEvent::TimeSignature {
            tick,
            beats,
            beat_type,
        }
    }

    fn seg(measure_index: usize, voice: u32, start_div: u64, dur_div: u64, pitch: u8) -> NoteSegment {
        NoteSegment {
            measure_index,
            voice,
            staff: 1,
            start_div,
            dur_div,
            pitch,
            velocity: 80,
            channel: 1,
            track_index: 0,
            start_tick: 0,
            end_tick: 0,
            tie_start: false,
            tie_stop: false,
        }
    }

    fn definition(segments: Vec<NoteSegment>) -> PartDefinition {
        PartDefinition {
            id: "P1".into(),
            name: "Piano".into(),
            channel: 1,
            program: Some(1),
            percussion: false,
            tempo_directions: true,
            segments,
        }
    }

    fn notes(measure: &Measure) -> Vec<&Note> {
        measure.notes().collect()
    }

    #[test]
    fn layout_covers_last_note() {
        let layout = ScoreLayout::new(480, 4, &[], 480 * 9);
        assert_eq!(layout.divisions, 4);
        assert_eq!(layout.measures.len(), 3);
        assert_eq!(layout.measures[1].start_div, 16);
        assert!(layout.measures[0].time_change && !layout.measures[1].time_change);
    }

    #[test]
    fn measure_grid_is_capped() {
        // about 2^28 ticks at one tick per quarter
        let layout = ScoreLayout::new(1, 4, &[], 0x0FFF_FFFF);
        assert_eq!(layout.measures.len(), MAX_MEASURES);
        assert_eq!(layout.end_tick(), 4 * MAX_MEASURES as u64);
    }

    #[test]
    fn empty_input_still_has_one_measure() {
        let layout = ScoreLayout::new(480, 4, &[], 0);
        assert_eq!(layout.measures.len(), 1);
    }

    #[test]
    fn time_signature_change_waits_for_barline() {
        // 3/4 announced halfway through bar 1 applies from bar 2
        let metas = [time_sig(0, 4, 4), time_sig(960, 3, 4)];
        let layout = ScoreLayout::new(480, 4, &metas, 480 * 10);
        assert_eq!(layout.measures[0].length_div, 16);
        assert_eq!(layout.measures[1].length_div, 12);
        assert_eq!(layout.measures[1].time, TimeSignature { beats: 3, beat_type: 4 });
        assert!(layout.measures[1].time_change);
        assert!(!layout.measures[2].time_change);
    }

    #[test]
    fn divisions_double_for_odd_meters() {
        let layout = ScoreLayout::new(480, 2, &[time_sig(0, 7, 16)], 480);
        assert_eq!(layout.divisions, 4);
        assert_eq!(layout.measures[0].length_div, 7);
    }

    #[test]
    fn long_note_splits_at_barline() {
        let layout = ScoreLayout::new(480, 4, &[], 480 * 6);
        let note = crate::quantize::QuantizedNote {
            track_index: 0,
            channel: 1,
            pitch: 60,
            start_tick: 480 * 3,
            end_tick: 480 * 6,
            velocity: 90,
        };
        let cluster = VoiceCluster {
            voice: 1,
            start_tick: note.start_tick,
            end_tick: note.end_tick,
            notes: vec![note],
        };
        let segs = segment_notes(&[cluster], 1, &layout);
        assert_eq!(segs.len(), 2);
        assert_eq!((segs[0].start_div, segs[0].dur_div), (12, 4));
        assert!(segs[0].tie_start && !segs[0].tie_stop);
        assert_eq!((segs[1].measure_index, segs[1].start_div, segs[1].dur_div), (1, 0, 8));
        assert!(segs[1].tie_stop && !segs[1].tie_start);
    }

    #[test]
    fn gaps_become_rests_and_odd_lengths_tie() {
        let layout = ScoreLayout::new(480, 4, &[], 480 * 4);
        // quarter rest, then a note of 5 sixteenths, then trailing rest
        let (part, warnings) = build_part(&definition(vec![seg(0, 1, 4, 5, 60)]), &layout);
        assert!(warnings.is_empty());
        let ns = notes(&part.measures[0]);
        let shape: Vec<(bool, i32, Option<&str>, bool, bool)> = ns
            .iter()
            .map(|n| (n.rest, n.duration, n.note_type.as_deref(), n.tie_start, n.tie_stop))
            .collect();
        assert_eq!(
            shape,
            vec![
                (true, 4, Some("quarter"), false, false),
                (false, 4, Some("quarter"), true, false),
                (false, 1, Some("16th"), false, true),
                (true, 7, Some("quarter"), false, false),
            ]
        );
        assert_eq!(ns[3].dots, 2);
    }

    #[test]
    fn chords_share_the_longest_duration() {
        let layout = ScoreLayout::new(480, 4, &[], 480 * 4);
        let (part, _) = build_part(
            &definition(vec![seg(0, 1, 0, 4, 64), seg(0, 1, 0, 8, 60)]),
            &layout,
        );
        let ns = notes(&part.measures[0]);
        assert_eq!(ns[0].pitch.as_ref().unwrap().to_midi(), 60);
        assert!(!ns[0].chord);
        assert!(ns[1].chord);
        assert_eq!(ns[0].duration, 8);
        assert_eq!(ns[1].duration, 8);
    }

    #[test]
    fn spelling_follows_key_and_carries_accidentals() {
        let metas = [MetaEvent::KeySignature {
            tick: 0,
            fifths: -2,
            minor: false,
        }];
        let layout = ScoreLayout::new(480, 4, &metas, 480 * 4);
        // Bb (key), Eb (key), F# spelled Gb, Gb again (carried)
        let segs = vec![
            seg(0, 1, 0, 4, 70),
            seg(0, 1, 4, 4, 63),
            seg(0, 1, 8, 4, 66),
            seg(0, 1, 12, 4, 66),
        ];
        let (part, _) = build_part(&definition(segs), &layout);
        let ns = notes(&part.measures[0]);
        let spelled: Vec<(&str, Option<f64>, Option<&str>)> = ns
            .iter()
            .map(|n| {
                let p = n.pitch.as_ref().unwrap();
                (p.step.as_str(), p.alter, n.accidental.as_deref())
            })
            .collect();
        assert_eq!(
            spelled,
            vec![
                ("B", Some(-1.0), None),
                ("E", Some(-1.0), None),
                ("G", Some(-1.0), Some("flat")),
                ("G", Some(-1.0), None),
            ]
        );
    }

    #[test]
    fn natural_sign_against_key() {
        let metas = [MetaEvent::KeySignature {
            tick: 0,
            fifths: 1,
            minor: false,
        }];
        let layout = ScoreLayout::new(480, 4, &metas, 480 * 4);
        let (part, _) = build_part(&definition(vec![seg(0, 1, 0, 16, 65)]), &layout);
        let n = notes(&part.measures[0])[0];
        assert_eq!(n.accidental.as_deref(), Some("natural"));
        assert_eq!(n.pitch.as_ref().unwrap().alter, None);
    }

    #[test]
    fn dynamics_written_only_on_change() {
        let layout = ScoreLayout::new(480, 4, &[], 480 * 4);
        let mut segs = vec![seg(0, 1, 0, 4, 60), seg(0, 1, 4, 4, 62), seg(0, 1, 8, 4, 64)];
        segs[0].velocity = 80;
        segs[1].velocity = 82;
        segs[2].velocity = 110;
        let (part, _) = build_part(&definition(segs), &layout);
        let marks: Vec<(Option<&str>, Option<i32>)> = part.measures[0]
            .directions()
            .filter(|d| d.dynamics.is_some())
            .map(|d| (d.dynamics.as_deref(), d.offset))
            .collect();
        assert_eq!(marks, vec![(Some("mf"), None), (Some("ff"), Some(8))]);
    }

    #[test]
    fn velocity_thresholds() {
        assert_eq!(dynamics_mark(1), "ppp");
        assert_eq!(dynamics_mark(20), "pp");
        assert_eq!(dynamics_mark(67), "mp");
        assert_eq!(dynamics_mark(84), "f");
        assert_eq!(dynamics_mark(127), "fff");
    }

    #[test]
    fn tempo_only_on_first_part() {
        let metas = [MetaEvent::Tempo { tick: 0, bpm: 90.0 }];
        let layout = ScoreLayout::new(480, 4, &metas, 480 * 4);
        let mut def = definition(vec![seg(0, 1, 0, 16, 60)]);
        let (first, _) = build_part(&def, &layout);
        def.tempo_directions = false;
        let (second, _) = build_part(&def, &layout);
        let tempo = |p: &Part| p.measures[0].directions().filter(|d| d.metronome.is_some()).count();
        assert_eq!(tempo(&first), 1);
        assert_eq!(tempo(&second), 0);
        // key and time are structural and appear on both
        assert!(second.measures[0].attributes().unwrap().time.is_some());
    }

    #[test]
    fn voices_become_lanes_separated_by_backup() {
        let layout = ScoreLayout::new(480, 4, &[], 480 * 4);
        let (part, _) = build_part(
            &definition(vec![seg(0, 1, 0, 16, 72), seg(0, 2, 0, 8, 60)]),
            &layout,
        );
        let m = &part.measures[0];
        let attrs = m.attributes().unwrap();
        assert_eq!(attrs.staves, Some(2));
        assert_eq!(attrs.clefs.len(), 2);
        assert!(m.elements.iter().any(|e| *e == MeasureElement::Backup(16)));
        let voices: Vec<Option<i32>> = m.notes().map(|n| n.voice).collect();
        assert_eq!(voices, vec![Some(1), Some(2), Some(2)]);
    }

    #[test]
    fn empty_measure_gets_measure_rest() {
        let layout = ScoreLayout::new(480, 4, &[], 480 * 8);
        let (part, _) = build_part(&definition(vec![seg(1, 1, 0, 16, 60)]), &layout);
        let n = notes(&part.measures[0])[0];
        assert!(n.rest && n.measure_rest);
        assert_eq!(n.duration, 16);
    }

    #[test]
    fn drums_use_unpitched_display_and_instruments() {
        let layout = ScoreLayout::new(480, 4, &[], 480 * 4);
        let mut def = definition(vec![seg(0, 1, 0, 4, 38), seg(0, 1, 4, 4, 20)]);
        def.percussion = true;
        def.channel = 10;
        let (part, warnings) = build_part(&def, &layout);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, DiagnosticCode::DrumNoteUnmapped);
        assert_eq!(part.instruments.len(), 2);
        let snare = notes(&part.measures[0])[0];
        assert_eq!(snare.unpitched.as_ref().unwrap().display_step.as_deref(), Some("C"));
        assert_eq!(snare.instrument.as_deref(), Some("P1-I39"));
        let inst = part.instruments.iter().find(|i| i.id == "P1-I39").unwrap();
        assert_eq!(inst.midi_unpitched, Some(39));
        assert_eq!(part.measures[0].attributes().unwrap().clefs[0].sign, "percussion");
    }
}
