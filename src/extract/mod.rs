//! Score event extraction: walks a [`Score`] in document order and
//! flattens it into timed playback events.
//!
//! In `midi` mode the notation is turned into performance detail
//! (articulation, ornaments, grace notes, ties, slurs, dynamics, wedges,
//! pedal).  In `playback` mode only notated pitches and durations survive,
//! at a constant velocity of 80.

mod grace;
mod nuance;
mod ornament;
mod pitch;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::options::ExportOptions;

use grace::{place_graces, PendingGrace};
use nuance::{articulation_effect, metric_accent, ArticulationEffect, Nuance, DETACHE_RATIO};
use pitch::{neighbor, resolve_drum, resolve_pitched, MeasureCarry};

/// Velocity used before any dynamics are seen, and throughout `playback` mode.
pub const DEFAULT_VELOCITY: u8 = 80;

/// GM percussion channel (1-based).
pub const DRUM_CHANNEL: u8 = 10;

// ═══════════════════════════════════════════════════════════════════════
// Output types
// ═══════════════════════════════════════════════════════════════════════

/// One sounding note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub pitch: u8,
    pub start_ticks: u64,
    pub dur_ticks: u64,
    /// 1-based MIDI channel
    pub channel: u8,
    pub velocity: u8,
    /// Part id the event came from
    pub track_id: String,
    /// Part display name
    pub track_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoEvent {
    pub tick: u64,
    /// Quarter notes per minute
    pub bpm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignatureEvent {
    pub tick: u64,
    pub beats: u8,
    pub beat_type: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignatureEvent {
    pub tick: u64,
    pub fifths: i8,
    pub minor: bool,
}

/// A controller value change (sustain pedal is CC64).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerChange {
    pub track_id: String,
    pub channel: u8,
    pub tick: u64,
    pub controller: u8,
    pub value: u8,
}

/// Everything the encoder needs from a score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Tempo in force at tick 0
    pub tempo: f64,
    /// Per part, in emission order
    pub events: Vec<PlaybackEvent>,
    pub tempo_events: Vec<TempoEvent>,
    pub time_signatures: Vec<TimeSignatureEvent>,
    pub key_signatures: Vec<KeySignatureEvent>,
    pub controllers: Vec<ControllerChange>,
    /// 0-based GM program per pitched part id, from `<midi-program>`
    pub programs: BTreeMap<String, u8>,
}

// ═══════════════════════════════════════════════════════════════════════
// Entry point
// ═══════════════════════════════════════════════════════════════════════

/// Flatten `score` into playback events at `ticks_per_quarter` resolution.
pub fn extract(score: &Score, ticks_per_quarter: u16, options: &ExportOptions) -> Extraction {
    let nuance = Nuance::for_options(options);
    let tpq = u64::from(ticks_per_quarter.max(1));
    let mut out = Extraction::default();
    let mut next_channel = 1u8;

    for part in &score.parts {
        let percussion = is_percussion(part);
        let channel = match part.midi_channel {
            Some(c @ 1..=16) => c as u8,
            _ if percussion => DRUM_CHANNEL,
            _ => sequential_channel(&mut next_channel),
        };
        if !percussion {
            if let Some(p @ 1..=128) = part.midi_program {
                out.programs.insert(part.id.clone(), (p - 1) as u8);
            }
        }

        let before = out.events.len();
        let mut walker = PartWalker::new(part, channel, percussion, tpq, nuance, options);
        for measure in &part.measures {
            walker.walk_measure(measure, &mut out);
        }
        debug!(
            "part {} ({}): {} events on channel {channel}",
            part.id,
            part.name,
            out.events.len() - before
        );
    }

    out.tempo_events.sort_by_key(|t| t.tick);
    out.time_signatures.sort_by_key(|t| t.tick);
    out.key_signatures.sort_by_key(|k| k.tick);
    out.tempo = out
        .tempo_events
        .iter()
        .find(|t| t.tick == 0)
        .map_or(120.0, |t| t.bpm);

    info!(
        "extracted {} events, {} controller changes from {} parts ({:?} mode)",
        out.events.len(),
        out.controllers.len(),
        score.parts.len(),
        options.mode
    );
    out
}

/// Channel 10 parts, unpitched notes or unpitched instruments.
fn is_percussion(part: &Part) -> bool {
    part.midi_channel == Some(i32::from(DRUM_CHANNEL))
        || part.instruments.iter().any(|i| i.midi_unpitched.is_some())
        || part
            .measures
            .iter()
            .flat_map(Measure::notes)
            .any(|n| n.unpitched.is_some())
}

/// Next channel in 1..=16, skipping the drum channel and wrapping.
fn sequential_channel(next: &mut u8) -> u8 {
    if *next == DRUM_CHANNEL {
        *next += 1;
    }
    if *next > 16 {
        *next = 1;
    }
    let channel = *next;
    *next += 1;
    channel
}

// ═══════════════════════════════════════════════════════════════════════
// Per-part walk
// ═══════════════════════════════════════════════════════════════════════

fn non_negative(div: i32) -> u64 {
    div.max(0) as u64
}

type TieKey = (i32, u8, i32);

/// Timing fixed by a chord head and shared by the chord notes after it.
#[derive(Debug, Clone, Copy, Default)]
struct ChordFrame {
    voice: i32,
    /// Voice pause offset in force at the head
    offset: u64,
    /// How far grace placement moved the head later
    delay: u64,
    /// How much grace placement took off the head
    shortening: u64,
}

struct PartWalker<'a> {
    part: &'a Part,
    options: &'a ExportOptions,
    nuance: Nuance,
    channel: u8,
    percussion: bool,
    tpq: u64,

    divisions: u64,
    time: TimeSignature,
    fifths: i32,
    transpose: i32,
    /// Tick of the current measure's first beat
    measure_start: u64,
    /// Running base velocity
    velocity: i32,

    /// Accumulated fermata/caesura pauses per voice
    pause: HashMap<i32, u64>,
    /// Open tie chains: index into `Extraction::events`
    ties: HashMap<TieKey, usize>,
    slurs: HashMap<i32, BTreeSet<i32>>,
    graces: HashMap<i32, Vec<PendingGrace>>,
    wedges: BTreeMap<i32, WedgeType>,
    chord: ChordFrame,
}

impl<'a> PartWalker<'a> {
    fn new(
        part: &'a Part,
        channel: u8,
        percussion: bool,
        tpq: u64,
        nuance: Nuance,
        options: &'a ExportOptions,
    ) -> Self {
        Self {
            part,
            options,
            nuance,
            channel,
            percussion,
            tpq,
            divisions: 1,
            time: TimeSignature {
                beats: 4,
                beat_type: 4,
            },
            fifths: 0,
            transpose: 0,
            measure_start: 0,
            velocity: i32::from(DEFAULT_VELOCITY),
            pause: HashMap::new(),
            ties: HashMap::new(),
            slurs: HashMap::new(),
            graces: HashMap::new(),
            wedges: BTreeMap::new(),
            chord: ChordFrame::default(),
        }
    }

    /// Divisions → ticks, rounding half up.
    fn ticks(&self, div: u64) -> u64 {
        (2 * div * self.tpq + self.divisions) / (2 * self.divisions)
    }

    fn walk_measure(&mut self, measure: &Measure, out: &mut Extraction) {
        let mut carry = MeasureCarry::new();
        let mut cursor = 0u64;
        let mut max_cursor = 0u64;
        let mut last_onset = 0u64;

        for (i, element) in measure.elements.iter().enumerate() {
            match element {
                MeasureElement::Attributes(attrs) => self.apply_attributes(attrs, cursor, out),
                MeasureElement::Direction(dir) => self.apply_direction(dir, cursor, out),
                MeasureElement::Backup(d) => cursor = cursor.saturating_sub(non_negative(*d)),
                MeasureElement::Forward(f) => cursor += non_negative(f.duration),
                MeasureElement::Note(note) => {
                    let chord_head = !note.chord
                        && measure.elements[i + 1..]
                            .iter()
                            .find_map(|e| match e {
                                MeasureElement::Note(n) => Some(n.chord),
                                _ => None,
                            })
                            .unwrap_or(false);
                    let onset = if note.chord { last_onset } else { cursor };
                    self.note(note, onset, note.chord || chord_head, &mut carry, out);
                    if !note.chord && note.grace.is_none() {
                        last_onset = cursor;
                        cursor += non_negative(note.duration);
                    }
                }
            }
            max_cursor = max_cursor.max(cursor);
        }

        let nominal = self.divisions * 4 * non_negative(self.time.beats) / non_negative(self.time.beat_type).max(1);
        let length = if measure.implicit || max_cursor > nominal {
            max_cursor
        } else {
            nominal
        };
        self.measure_start += self.ticks(length);
    }

    fn apply_attributes(&mut self, attrs: &Attributes, cursor: u64, out: &mut Extraction) {
        if let Some(d) = attrs.divisions.filter(|d| *d > 0) {
            self.divisions = d as u64;
        }
        let tick = self.measure_start + self.ticks(cursor);
        if let Some(time) = attrs.time.filter(|t| t.beats > 0 && t.beat_type > 0) {
            self.time = time;
            out.time_signatures.push(TimeSignatureEvent {
                tick,
                beats: time.beats.min(255) as u8,
                beat_type: time.beat_type.min(128) as u8,
            });
        }
        if let Some(key) = &attrs.key {
            self.fifths = key.fifths;
            out.key_signatures.push(KeySignatureEvent {
                tick,
                fifths: key.fifths.clamp(-7, 7) as i8,
                minor: key.mode.as_deref() == Some("minor"),
            });
        }
        if let Some(t) = &attrs.transpose {
            self.transpose = t.semitones();
        }
    }

    fn apply_direction(&mut self, dir: &Direction, cursor: u64, out: &mut Extraction) {
        let at = (cursor as i64 + i64::from(dir.offset.unwrap_or(0))).max(0) as u64;
        let tick = self.measure_start + self.ticks(at);
        let sound = dir.sound.as_ref();

        let bpm = sound
            .and_then(|s| s.tempo)
            .or_else(|| dir.metronome.as_ref().map(MetronomeMark::quarter_bpm));
        if let Some(bpm) = bpm.filter(|b| *b > 0.0) {
            out.tempo_events.push(TempoEvent { tick, bpm });
        }

        if self.nuance.dynamics {
            let marked = dir.dynamics.as_deref().and_then(dynamic_velocity).map(i32::from);
            let scaled = sound
                .and_then(|s| s.dynamics)
                .map(|pct| (pct * FORTE_VELOCITY / 100.0).round() as i32);
            if let Some(v) = marked.or(scaled) {
                self.velocity = v.clamp(1, 127);
            }
        }

        if self.nuance.wedges {
            if let Some(wedge) = dir.wedge {
                match wedge.wedge_type {
                    WedgeType::Crescendo | WedgeType::Diminuendo => {
                        self.wedges.insert(wedge.number, wedge.wedge_type);
                    }
                    WedgeType::Stop => {
                        self.wedges.remove(&wedge.number);
                    }
                    WedgeType::Continue => {}
                }
            }
        }

        if self.nuance.pedal {
            match (dir.pedal, sound.and_then(|s| s.damper_pedal)) {
                (Some(PedalType::Start), _) => self.pedal(tick, 127, out),
                (Some(PedalType::Stop), _) => self.pedal(tick, 0, out),
                (Some(PedalType::Change), _) => {
                    self.pedal(tick, 0, out);
                    self.pedal(tick + 1, 127, out);
                }
                (Some(PedalType::Continue), _) => {}
                (None, Some(down)) => self.pedal(tick, if down { 127 } else { 0 }, out),
                (None, None) => {}
            }
        }
    }

    fn pedal(&self, tick: u64, value: u8, out: &mut Extraction) {
        out.controllers.push(ControllerChange {
            track_id: self.part.id.clone(),
            channel: self.channel,
            tick,
            controller: 64,
            value,
        });
    }

    // ─── Notes ──────────────────────────────────────────────────────

    fn note(
        &mut self,
        note: &Note,
        onset: u64,
        in_chord: bool,
        carry: &mut MeasureCarry,
        out: &mut Extraction,
    ) {
        let voice = note.voice.unwrap_or(1);
        if !note.chord && note.grace.is_none() {
            self.chord = ChordFrame {
                voice,
                offset: self.pause.get(&voice).copied().unwrap_or(0),
                ..Default::default()
            };
        }
        let member = note.chord && self.chord.voice == voice;
        if note.rest {
            self.graces.remove(&voice);
            return;
        }

        let active = self.slurs.entry(voice).or_default();
        let mut covered = !active.is_empty();
        for slur in &note.slurs {
            match slur.slur_type.as_str() {
                "start" => {
                    covered = true;
                    active.insert(slur.number);
                }
                "continue" => {
                    active.insert(slur.number);
                }
                "stop" => {
                    active.remove(&slur.number);
                }
                _ => {}
            }
        }

        let drum = self.percussion || note.unpitched.is_some();
        let pitch = if drum {
            resolve_drum(note, self.part)
        } else {
            let Some(written) = note
                .pitch
                .as_ref()
                .and_then(|p| resolve_pitched(p, note.accidental.as_deref(), self.fifths, carry))
            else {
                return;
            };
            written + self.transpose
        };
        if !(0..=127).contains(&pitch) {
            return;
        }

        if let Some(g) = note.grace {
            if self.nuance.graces {
                self.graces.entry(voice).or_default().push(PendingGrace {
                    pitch,
                    slash: g.slash,
                    velocity: self.velocity.clamp(1, 127) as u8,
                });
            }
            return;
        }

        // Velocity
        if self.nuance.wedges && !note.chord {
            let nudge: i32 = self
                .wedges
                .values()
                .map(|w| match w {
                    WedgeType::Crescendo => 4,
                    WedgeType::Diminuendo => -4,
                    _ => 0,
                })
                .sum();
            self.velocity = (self.velocity + nudge).clamp(1, 127);
        }
        let effect = if self.nuance.articulation {
            articulation_effect(note)
        } else {
            ArticulationEffect::default()
        };
        let mut velocity = self.velocity + effect.velocity_bonus;
        if self.nuance.metric_accent {
            velocity += metric_accent(onset, self.divisions, self.time, self.options.accent_profile);
        }
        let velocity = velocity.clamp(1, 127) as u8;

        // Duration
        let notated = self.ticks(non_negative(note.duration));
        let tied = note.tie_start || note.tie_stop;
        let mut sounding = notated as f64;
        let mut pause = 0u64;
        if self.nuance.articulation {
            let ratio = effect.ratio.or_else(|| {
                (!effect.any && !in_chord && !tied && !covered).then_some(DETACHE_RATIO)
            });
            if let Some(ratio) = ratio {
                sounding *= ratio;
            }
        }
        if self.nuance.legato && (covered || effect.sustained) && !in_chord && !tied {
            sounding += (self.tpq / 32) as f64;
        }
        if self.nuance.fermata {
            if note.fermata {
                sounding += (0.35 * notated as f64).max((self.tpq / 8) as f64);
                pause += self.tpq / 6;
            }
            if effect.caesura {
                sounding += 0.12 * notated as f64;
                pause += self.tpq / 4;
            }
        }

        // A head's own pause only shifts the notes after its chord
        let offset = if note.chord && !member {
            self.pause.get(&voice).copied().unwrap_or(0)
        } else {
            self.chord.offset
        };
        let mut start = self.measure_start + self.ticks(onset) + offset;
        let mut dur = (sounding.round() as u64).max(1);

        if let Some(pending) = self.graces.remove(&voice).filter(|g| !g.is_empty()) {
            let placement = place_graces(&pending, start, dur, self.tpq, self.options.grace_timing);
            for (grace, (g_start, g_dur)) in pending.iter().zip(&placement.graces) {
                self.emit(grace.pitch, *g_start, *g_dur, grace.velocity, out);
            }
            if !note.chord {
                self.chord.delay = placement.principal_start.saturating_sub(start);
                self.chord.shortening = dur.saturating_sub(placement.principal_dur);
            }
            start = placement.principal_start;
            dur = placement.principal_dur;
        } else if member {
            start += self.chord.delay;
            dur = dur.saturating_sub(self.chord.shortening).max(1);
        }

        if !note.chord {
            *self.pause.entry(voice).or_insert(0) += pause;
        }

        let key = (voice, self.channel, pitch);
        if self.nuance.ties && note.tie_stop {
            if let Some(&idx) = self.ties.get(&key) {
                let open = &mut out.events[idx];
                open.dur_ticks += dur;
                open.velocity = open.velocity.max(velocity);
                if !note.tie_start {
                    self.ties.remove(&key);
                }
                return;
            }
        }

        match note.ornaments.first() {
            Some(&ornament) if self.nuance.ornaments && !drum && !tied => {
                let Some(written) = &note.pitch else { return };
                let principal = pitch - self.transpose;
                let upper = neighbor(written, principal, true, self.fifths, carry, &note.accidental_marks);
                let lower = neighbor(written, principal, false, self.fifths, carry, &note.accidental_marks);
                let subs = ornament::expand(
                    ornament,
                    pitch,
                    upper + self.transpose,
                    lower + self.transpose,
                    start,
                    dur,
                    self.tpq,
                );
                for (p, s, d) in subs {
                    self.emit(p, s, d, velocity, out);
                }
            }
            _ => {
                if let Some(idx) = self.emit(pitch, start, dur, velocity, out) {
                    if self.nuance.ties && note.tie_start {
                        self.ties.insert(key, idx);
                    }
                }
            }
        }
    }

    /// Push one event; returns its index, or `None` when the pitch is out of range.
    fn emit(&self, pitch: i32, start: u64, dur: u64, velocity: u8, out: &mut Extraction) -> Option<usize> {
        let pitch = u8::try_from(pitch).ok().filter(|p| *p <= 127)?;
        out.events.push(PlaybackEvent {
            pitch,
            start_ticks: start,
            dur_ticks: dur.max(1),
            channel: self.channel,
            velocity,
            track_id: self.part.id.clone(),
            track_name: self.part.name.clone(),
        });
        Some(out.events.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{AccentProfile, GraceTimingMode, PlaybackMode};
    use crate::parser::parse_musicxml;
    use pretty_assertions::assert_eq;

    const ATTRS: &str = "<attributes><divisions>1</divisions><key><fifths>0</fifths></key>\
        <time><beats>4</beats><beat-type>4</beat-type></time></attributes>";

    fn one_part(measures: &str) -> Score {
        let xml = format!(
            r#"<?xml version="1.0"?>
<score-partwise version="3.1">
  <part-list><score-part id="P1"><part-name>Piano</part-name></score-part></part-list>
  <part id="P1">{measures}</part>
</score-partwise>"#
        );
        parse_musicxml(&xml).unwrap()
    }

    fn note(step: &str, octave: i32, duration: i32, extra: &str) -> String {
        format!(
            "<note><pitch><step>{step}</step><octave>{octave}</octave></pitch>\
             <duration>{duration}</duration><voice>1</voice>{extra}</note>"
        )
    }

    fn midi() -> ExportOptions {
        ExportOptions::default()
    }

    fn playback() -> ExportOptions {
        ExportOptions {
            mode: PlaybackMode::Playback,
            ..Default::default()
        }
    }

    fn spans(x: &Extraction) -> Vec<(u8, u64, u64)> {
        x.events.iter().map(|e| (e.pitch, e.start_ticks, e.dur_ticks)).collect()
    }

    fn tied_whole_notes() -> Score {
        let tie = |kinds: &[&str]| {
            kinds
                .iter()
                .map(|k| format!(r#"<tie type="{k}"/>"#))
                .collect::<String>()
        };
        one_part(&format!(
            r#"<measure number="1">{ATTRS}{}</measure>
               <measure number="2">{}</measure>
               <measure number="3">{}</measure>"#,
            note("C", 4, 4, &tie(&["start"])),
            note("C", 4, 4, &tie(&["stop", "start"])),
            note("C", 4, 4, &tie(&["stop"])),
        ))
    }

    #[test]
    fn tie_chain_folds_into_one_event() {
        let x = extract(&tied_whole_notes(), 480, &midi());
        assert_eq!(spans(&x), vec![(60, 0, 5760)]);
        assert_eq!(x.events[0].track_id, "P1");
        assert_eq!(x.events[0].track_name, "Piano");
    }

    #[test]
    fn playback_mode_keeps_notated_values() {
        let x = extract(&tied_whole_notes(), 480, &playback());
        assert_eq!(spans(&x), vec![(60, 0, 1920), (60, 1920, 1920), (60, 3840, 1920)]);
        assert!(x.events.iter().all(|e| e.velocity == DEFAULT_VELOCITY));
    }

    #[test]
    fn detache_and_staccato() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}{}</measure>"#,
            note("C", 4, 1, ""),
            note("D", 4, 1, "<notations><articulations><staccato/></articulations></notations>"),
        ));
        let x = extract(&score, 480, &midi());
        assert_eq!(spans(&x), vec![(60, 0, 446), (62, 480, 264)]);
    }

    #[test]
    fn accents_raise_velocity() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}</measure>"#,
            note("C", 4, 1, "<notations><articulations><accent/></articulations></notations>"),
        ));
        let x = extract(&score, 480, &midi());
        assert_eq!(x.events[0].velocity, 94);
    }

    #[test]
    fn slurred_notes_overlap() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}{}</measure>"#,
            note("C", 4, 1, r#"<notations><slur type="start" number="1"/></notations>"#),
            note("D", 4, 1, r#"<notations><slur type="stop" number="1"/></notations>"#),
        ));
        let x = extract(&score, 480, &midi());
        assert_eq!(spans(&x), vec![(60, 0, 495), (62, 480, 495)]);
    }

    #[test]
    fn grace_note_before_the_beat() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}<note><grace slash="yes"/><pitch><step>D</step><octave>4</octave></pitch><voice>1</voice></note>{}</measure>"#,
            note("C", 4, 1, ""),
            note("E", 4, 1, ""),
        ));
        let x = extract(&score, 480, &midi());
        assert_eq!(spans(&x), vec![(60, 0, 446), (62, 450, 30), (64, 480, 446)]);

        let on_beat = ExportOptions {
            grace_timing: GraceTimingMode::OnBeat,
            ..Default::default()
        };
        let x = extract(&score, 480, &on_beat);
        assert_eq!(spans(&x)[1..].to_vec(), vec![(62, 480, 30), (64, 510, 416)]);

        // graces are dropped in playback mode
        assert_eq!(extract(&score, 480, &playback()).events.len(), 2);
    }

    #[test]
    fn trill_alternates_with_upper_neighbour() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}</measure>"#,
            note("E", 4, 1, "<notations><ornaments><trill-mark/></ornaments></notations>"),
        ));
        let x = extract(&score, 480, &midi());
        let pitches: Vec<u8> = x.events.iter().map(|e| e.pitch).collect();
        assert_eq!(pitches, vec![64, 65, 64, 65, 64, 65, 64]);
        assert_eq!(x.events[0].start_ticks, 0);
    }

    #[test]
    fn fermata_extends_and_delays_the_voice() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}{}</measure>"#,
            note("C", 4, 1, "<notations><fermata/></notations>"),
            note("D", 4, 1, ""),
        ));
        let x = extract(&score, 480, &midi());
        // 480 * 0.93 + 480 * 0.35
        assert_eq!(spans(&x), vec![(60, 0, 614), (62, 560, 446)]);
    }

    #[test]
    fn backup_starts_second_voice_at_measure_start() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}<backup><duration>4</duration></backup>
               <note><pitch><step>C</step><octave>3</octave></pitch><duration>4</duration><voice>2</voice></note></measure>"#,
            note("C", 5, 4, ""),
        ));
        let x = extract(&score, 480, &playback());
        assert_eq!(spans(&x), vec![(72, 0, 1920), (48, 0, 1920)]);
    }

    #[test]
    fn chord_members_share_onset_without_detache() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}{}</measure>"#,
            note("C", 4, 2, ""),
            note("E", 4, 2, "<chord/>"),
        ));
        let x = extract(&score, 480, &midi());
        assert_eq!(spans(&x), vec![(60, 0, 960), (64, 0, 960)]);
    }

    #[test]
    fn fermata_on_a_chord_delays_only_what_follows() {
        let fermata = "<notations><fermata/></notations>";
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}{}{}{}</measure>"#,
            note("C", 4, 2, fermata),
            note("E", 4, 2, &format!("<chord/>{fermata}")),
            note("G", 4, 2, &format!("<chord/>{fermata}")),
            note("D", 4, 1, ""),
        ));
        let x = extract(&score, 480, &midi());
        // 960 + 960 * 0.35, then a tpq/6 pause before the D
        assert_eq!(
            spans(&x),
            vec![(60, 0, 1296), (64, 0, 1296), (67, 0, 1296), (62, 1040, 446)]
        );
    }

    fn grace_before_chord() -> Score {
        one_part(&format!(
            r#"<measure number="1">{ATTRS}<note><grace/><pitch><step>D</step><octave>4</octave></pitch><voice>1</voice></note>{}{}</measure>"#,
            note("C", 4, 2, ""),
            note("E", 4, 2, "<chord/>"),
        ))
    }

    #[test]
    fn on_beat_grace_moves_the_whole_chord() {
        let options = ExportOptions {
            grace_timing: GraceTimingMode::OnBeat,
            ..Default::default()
        };
        let x = extract(&grace_before_chord(), 480, &options);
        assert_eq!(spans(&x), vec![(62, 0, 60), (60, 60, 900), (64, 60, 900)]);
    }

    #[test]
    fn classical_equal_grace_moves_the_whole_chord() {
        let options = ExportOptions {
            grace_timing: GraceTimingMode::ClassicalEqual,
            ..Default::default()
        };
        let x = extract(&grace_before_chord(), 480, &options);
        assert_eq!(spans(&x), vec![(62, 0, 480), (60, 480, 480), (64, 480, 480)]);
    }

    #[test]
    fn caesura_lengthens_and_pauses() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}{}</measure>"#,
            note("C", 4, 1, "<notations><articulations><caesura/></articulations></notations>"),
            note("D", 4, 1, ""),
        ));
        let x = extract(&score, 480, &midi());
        // 480 + 12%, then a tpq/4 pause
        assert_eq!(spans(&x), vec![(60, 0, 538), (62, 600, 446)]);
    }

    #[test]
    fn tenuto_holds_with_legato_overlap() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}{}</measure>"#,
            note("C", 4, 1, "<notations><articulations><tenuto/></articulations></notations>"),
            note(
                "D",
                4,
                1,
                "<notations><articulations><tenuto/><staccato/></articulations></notations>"
            ),
        ));
        let x = extract(&score, 480, &midi());
        // portato plays as tenuto
        assert_eq!(spans(&x), vec![(60, 0, 495), (62, 480, 495)]);
    }

    #[test]
    fn diminuendo_and_stacked_wedges() {
        let wedge = |kind: &str, number: i32| {
            format!(
                r#"<direction><direction-type><wedge type="{kind}" number="{number}"/></direction-type></direction>"#
            )
        };
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}{}{}{}{}{}{}{}</measure>"#,
            wedge("diminuendo", 1),
            note("C", 4, 1, ""),
            note("D", 4, 1, ""),
            wedge("stop", 1),
            wedge("crescendo", 1),
            wedge("crescendo", 2),
            note("E", 4, 1, ""),
            note("F", 4, 1, ""),
        ));
        let x = extract(&score, 480, &midi());
        let velocities: Vec<u8> = x.events.iter().map(|e| e.velocity).collect();
        assert_eq!(velocities, vec![76, 72, 80, 88]);
    }

    #[test]
    fn sound_dynamics_set_velocity_unless_a_mark_is_given() {
        let sound = r#"<direction><sound dynamics="100"/></direction>"#;
        let both = r#"<direction><direction-type><dynamics><p/></dynamics></direction-type><sound dynamics="120"/></direction>"#;
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{sound}{}{both}{}</measure>"#,
            note("C", 4, 1, ""),
            note("D", 4, 1, ""),
        ));
        let x = extract(&score, 480, &midi());
        let velocities: Vec<u8> = x.events.iter().map(|e| e.velocity).collect();
        assert_eq!(velocities, vec![90, 49]);
    }

    #[test]
    fn metric_accent_follows_the_beat() {
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}{}{}{}</measure>"#,
            note("C", 4, 1, ""),
            note("D", 4, 1, ""),
            note("E", 4, 1, ""),
            note("F", 4, 1, ""),
        ));
        let velocities = |options: &ExportOptions| -> Vec<u8> {
            extract(&score, 480, options).events.iter().map(|e| e.velocity).collect()
        };

        let balanced = ExportOptions {
            metric_accent: true,
            ..Default::default()
        };
        assert_eq!(velocities(&balanced), vec![88, 80, 84, 80]);

        let strong = ExportOptions {
            metric_accent: true,
            accent_profile: AccentProfile::Strong,
            ..Default::default()
        };
        assert_eq!(velocities(&strong), vec![92, 80, 86, 80]);

        // off by default
        assert_eq!(velocities(&midi()), vec![80, 80, 80, 80]);
    }

    #[test]
    fn transposition_and_key_signature() {
        let score = one_part(&format!(
            r#"<measure number="1"><attributes><divisions>1</divisions><key><fifths>1</fifths></key>
               <transpose><diatonic>-1</diatonic><chromatic>-2</chromatic></transpose></attributes>{}</measure>"#,
            note("F", 4, 1, ""),
        ));
        let x = extract(&score, 480, &playback());
        assert_eq!(x.events[0].pitch, 64);
        assert_eq!(x.key_signatures, vec![KeySignatureEvent { tick: 0, fifths: 1, minor: false }]);
    }

    #[test]
    fn dynamics_and_wedges() {
        let dynamic = r#"<direction><direction-type><dynamics><p/></dynamics></direction-type></direction>"#;
        let cresc = r#"<direction><direction-type><wedge type="crescendo" number="1"/></direction-type></direction>"#;
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{dynamic}{}{cresc}{}{}</measure>"#,
            note("C", 4, 1, ""),
            note("D", 4, 1, ""),
            note("E", 4, 1, ""),
        ));
        let x = extract(&score, 480, &midi());
        let velocities: Vec<u8> = x.events.iter().map(|e| e.velocity).collect();
        assert_eq!(velocities, vec![49, 53, 57]);
    }

    #[test]
    fn tempo_from_metronome_and_sound() {
        let metronome = r#"<direction><direction-type><metronome><beat-unit>quarter</beat-unit>
            <beat-unit-dot/><per-minute>60</per-minute></metronome></direction-type></direction>"#;
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{metronome}{}</measure>
               <measure number="2"><sound tempo="132"/>{}</measure>"#,
            note("C", 4, 4, ""),
            note("C", 4, 4, ""),
        ));
        let x = extract(&score, 480, &playback());
        assert_eq!(x.tempo, 90.0);
        assert_eq!(
            x.tempo_events,
            vec![TempoEvent { tick: 0, bpm: 90.0 }, TempoEvent { tick: 1920, bpm: 132.0 }]
        );
        assert_eq!(x.time_signatures, vec![TimeSignatureEvent { tick: 0, beats: 4, beat_type: 4 }]);
    }

    #[test]
    fn pedal_marks_become_sustain_controller() {
        let pedal = |kind: &str| {
            format!(r#"<direction><direction-type><pedal type="{kind}"/></direction-type></direction>"#)
        };
        let score = one_part(&format!(
            r#"<measure number="1">{ATTRS}{}{}{}{}{}</measure>"#,
            pedal("start"),
            note("C", 4, 2, ""),
            pedal("change"),
            note("D", 4, 2, ""),
            pedal("stop"),
        ));
        let x = extract(&score, 480, &midi());
        let cc: Vec<(u64, u8, u8)> = x.controllers.iter().map(|c| (c.tick, c.controller, c.value)).collect();
        assert_eq!(cc, vec![(0, 64, 127), (960, 64, 0), (961, 64, 127), (1920, 64, 0)]);
        assert!(extract(&score, 480, &playback()).controllers.is_empty());
    }

    #[test]
    fn channels_skip_the_drum_channel() {
        let mut next = 1;
        let channels: Vec<u8> = (0..17).map(|_| sequential_channel(&mut next)).collect();
        assert_eq!(&channels[..10], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 11]);
        assert_eq!(&channels[14..], &[15, 16, 1]);
    }

    #[test]
    fn drum_parts_use_channel_ten() {
        let xml = r#"<score-partwise version="3.1">
  <part-list>
    <score-part id="P1"><part-name>Bass</part-name>
      <midi-instrument id="P1-I1"><midi-program>34</midi-program></midi-instrument></score-part>
    <score-part id="P2"><part-name>Drums</part-name>
      <score-instrument id="P2-I37"><instrument-name>Bass Drum 1</instrument-name></score-instrument>
      <midi-instrument id="P2-I37"><midi-unpitched>37</midi-unpitched></midi-instrument></score-part>
  </part-list>
  <part id="P1"><measure number="1"><attributes><divisions>1</divisions></attributes>
    <note><pitch><step>E</step><octave>2</octave></pitch><duration>4</duration></note></measure></part>
  <part id="P2"><measure number="1"><attributes><divisions>1</divisions></attributes>
    <note><unpitched><display-step>F</display-step><display-octave>4</display-octave></unpitched>
      <duration>4</duration><instrument id="P2-I37"/></note></measure></part>
</score-partwise>"#;
        let score = parse_musicxml(xml).unwrap();
        let x = extract(&score, 480, &playback());
        let summary: Vec<(&str, u8, u8)> = x
            .events
            .iter()
            .map(|e| (e.track_id.as_str(), e.channel, e.pitch))
            .collect();
        assert_eq!(summary, vec![("P1", 1, 40), ("P2", 10, 36)]);
        assert_eq!(x.programs.get("P1"), Some(&33));
        assert!(!x.programs.contains_key("P2"));
    }
}
