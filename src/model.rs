//! Data model for a MusicXML `score-partwise` document.
//!
//! The assembler produces these structures from MIDI; the parser produces
//! them from MusicXML text; the extractor walks them to build playback
//! events.  Measure content keeps document order because `<backup>` and
//! `<forward>` move the time cursor between the notes around them.

use serde::{Deserialize, Serialize};

/// A complete musical score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Title of the piece
    pub title: Option<String>,
    /// Composer name
    pub composer: Option<String>,
    /// MusicXML version (e.g., "3.1", "4.0")
    pub version: Option<String>,
    /// Software that created the file
    pub software: Option<String>,
    /// Musical parts (instruments)
    pub parts: Vec<Part>,
}

/// A musical part (one instrument or one MIDI track/channel pair).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// Part identifier (e.g., "P1")
    pub id: String,
    /// Part name (e.g., "Classical Guitar")
    pub name: String,
    /// Abbreviated name (e.g., "Guit.")
    pub abbreviation: Option<String>,
    /// MIDI program number, 1-based as written in `<midi-program>`
    pub midi_program: Option<i32>,
    /// MIDI channel, 1-based
    pub midi_channel: Option<i32>,
    /// `<score-instrument>` definitions (drum kits list one per sound)
    pub instruments: Vec<ScoreInstrument>,
    /// Ordered list of measures
    pub measures: Vec<Measure>,
}

/// One `<score-instrument>` with its `<midi-instrument>` settings merged in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreInstrument {
    pub id: String,
    pub name: String,
    /// 1-based unpitched note number (`<midi-unpitched>`)
    pub midi_unpitched: Option<i32>,
    pub midi_channel: Option<i32>,
    pub midi_program: Option<i32>,
}

/// A single measure (bar) of music.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    /// Measure number
    pub number: i32,
    /// Whether this is an implicit measure (e.g., pickup/anacrusis)
    pub implicit: bool,
    /// Measure content in document order
    pub elements: Vec<MeasureElement>,
}

/// The children of `<measure>` that matter for timing and playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeasureElement {
    Attributes(Attributes),
    Direction(Direction),
    Note(Note),
    /// `<backup>`: move the cursor back by this many divisions
    Backup(i32),
    Forward(Forward),
}

/// `<forward>`: move the cursor ahead without sounding anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forward {
    pub duration: i32,
    pub voice: Option<i32>,
    pub staff: Option<i32>,
}

/// Musical attributes that may change at any point in a measure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    /// Divisions per quarter note (determines duration resolution)
    pub divisions: Option<i32>,
    /// Key signature
    pub key: Option<Key>,
    /// Time signature
    pub time: Option<TimeSignature>,
    /// Number of staves in this part
    pub staves: Option<i32>,
    /// Clef(s), one per staff
    pub clefs: Vec<Clef>,
    /// Transposition
    pub transpose: Option<Transpose>,
}

/// Key signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    /// Number of sharps (positive) or flats (negative)
    pub fifths: i32,
    /// Mode (e.g., "major", "minor")
    pub mode: Option<String>,
}

/// Time signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (e.g., 3 in 3/4)
    pub beats: i32,
    /// Denominator (e.g., 4 in 3/4)
    pub beat_type: i32,
}

/// Clef definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clef {
    /// Staff number this clef belongs to (1-based; defaults to 1)
    pub number: i32,
    /// Clef sign: "G", "F", "C" or "percussion"
    pub sign: String,
    /// Staff line the clef sits on
    pub line: Option<i32>,
    /// Octave transposition (e.g., -1 for guitar's octave-lower treble clef)
    pub octave_change: Option<i32>,
}

/// Transposition information (written → sounding).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transpose {
    pub diatonic: i32,
    pub chromatic: i32,
    pub octave_change: Option<i32>,
}

impl Transpose {
    /// Total shift in semitones.
    pub fn semitones(&self) -> i32 {
        self.chromatic + 12 * self.octave_change.unwrap_or(0)
    }
}

/// A `<direction>` (or a bare measure-level `<sound>`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub placement: Option<String>,
    pub voice: Option<i32>,
    pub staff: Option<i32>,
    /// `<offset>` in divisions from the current cursor
    pub offset: Option<i32>,
    pub metronome: Option<MetronomeMark>,
    /// Dynamic mark name ("pp", "mf", …)
    pub dynamics: Option<String>,
    pub wedge: Option<Wedge>,
    pub pedal: Option<PedalType>,
    pub words: Option<String>,
    pub sound: Option<Sound>,
}

/// Playback attributes of `<sound>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sound {
    /// Quarter notes per minute
    pub tempo: Option<f64>,
    /// Percentage of forte velocity (90)
    pub dynamics: Option<f64>,
    pub damper_pedal: Option<bool>,
}

/// Metronome mark (e.g., ♩ = 120).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetronomeMark {
    /// Beat unit: "quarter", "half", "eighth", …
    pub beat_unit: String,
    /// Whether the beat unit is dotted
    pub dotted: bool,
    /// Beats per minute
    pub per_minute: f64,
}

impl MetronomeMark {
    /// Tempo expressed in quarter notes per minute.
    pub fn quarter_bpm(&self) -> f64 {
        let unit = note_type_quarters(&self.beat_unit).unwrap_or(1.0);
        let unit = if self.dotted { unit * 1.5 } else { unit };
        self.per_minute * unit
    }
}

/// Crescendo / diminuendo hairpin boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wedge {
    pub wedge_type: WedgeType,
    pub number: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WedgeType {
    Crescendo,
    Diminuendo,
    Stop,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PedalType {
    Start,
    Stop,
    Change,
    Continue,
}

/// A single note or rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Pitch (None for rests and unpitched notes)
    pub pitch: Option<Pitch>,
    /// Display position of an unpitched (percussion) note
    pub unpitched: Option<Unpitched>,
    /// `<instrument id>` reference into the part's instruments
    pub instrument: Option<String>,
    /// Duration in divisions (0 for grace notes)
    pub duration: i32,
    /// Voice number (for multi-voice writing)
    pub voice: Option<i32>,
    /// Staff number (1-based; for multi-staff parts like piano)
    pub staff: Option<i32>,
    /// Note type: "whole", "half", "quarter", "eighth", "16th", …
    pub note_type: Option<String>,
    /// Number of augmentation dots
    pub dots: u8,
    /// Whether this is a rest
    pub rest: bool,
    /// Whole-measure rest (`<rest measure="yes"/>`)
    pub measure_rest: bool,
    /// Whether this note is part of a chord with the previous note
    pub chord: bool,
    /// Grace note marker
    pub grace: Option<Grace>,
    /// Accidental: "sharp", "flat", "natural", "double-sharp", "flat-flat"
    pub accidental: Option<String>,
    pub tie_start: bool,
    pub tie_stop: bool,
    /// Slur start/stop events attached to this note
    pub slurs: Vec<SlurEvent>,
    pub articulations: Vec<Articulation>,
    pub ornaments: Vec<Ornament>,
    /// Accidentals printed on ornaments (alter the ornament neighbour)
    pub accidental_marks: Vec<AccidentalMark>,
    pub fermata: bool,
    /// Stem direction: "up" or "down"
    pub stem: Option<String>,
    /// Free-form XML comment written before the note (debug metadata)
    pub comment: Option<String>,
}

/// Pitch of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// Note name: A, B, C, D, E, F, G
    pub step: String,
    /// Octave number (middle C = C4)
    pub octave: i32,
    /// Chromatic alteration: -1.0 = flat, 1.0 = sharp, 0.0 = natural
    pub alter: Option<f64>,
}

/// Staff position of an unpitched note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unpitched {
    pub display_step: Option<String>,
    pub display_octave: Option<i32>,
}

/// `<grace>`; `slash` marks an acciaccatura.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grace {
    pub slash: bool,
}

/// A slur start or stop on a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlurEvent {
    /// "start", "stop" or "continue"
    pub slur_type: String,
    /// Slur number for overlapping slurs
    pub number: i32,
    /// "above" or "below"
    pub placement: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Articulation {
    Accent,
    StrongAccent,
    Staccato,
    Staccatissimo,
    Tenuto,
    Caesura,
}

impl Articulation {
    pub fn xml_name(self) -> &'static str {
        match self {
            Articulation::Accent => "accent",
            Articulation::StrongAccent => "strong-accent",
            Articulation::Staccato => "staccato",
            Articulation::Staccatissimo => "staccatissimo",
            Articulation::Tenuto => "tenuto",
            Articulation::Caesura => "caesura",
        }
    }

    pub fn from_xml_name(name: &str) -> Option<Self> {
        Some(match name {
            "accent" => Articulation::Accent,
            "strong-accent" => Articulation::StrongAccent,
            "staccato" => Articulation::Staccato,
            "staccatissimo" => Articulation::Staccatissimo,
            "tenuto" => Articulation::Tenuto,
            "caesura" => Articulation::Caesura,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ornament {
    TrillMark,
    Shake,
    Turn,
    InvertedTurn,
    Mordent,
    InvertedMordent,
}

impl Ornament {
    pub fn xml_name(self) -> &'static str {
        match self {
            Ornament::TrillMark => "trill-mark",
            Ornament::Shake => "shake",
            Ornament::Turn => "turn",
            Ornament::InvertedTurn => "inverted-turn",
            Ornament::Mordent => "mordent",
            Ornament::InvertedMordent => "inverted-mordent",
        }
    }

    pub fn from_xml_name(name: &str) -> Option<Self> {
        Some(match name {
            "trill-mark" => Ornament::TrillMark,
            "shake" => Ornament::Shake,
            "turn" => Ornament::Turn,
            "inverted-turn" => Ornament::InvertedTurn,
            "mordent" => Ornament::Mordent,
            "inverted-mordent" => Ornament::InvertedMordent,
            _ => return None,
        })
    }
}

/// `<accidental-mark>` inside `<ornaments>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccidentalMark {
    /// "sharp", "flat", "natural", …
    pub value: String,
    /// "above" applies to the upper neighbour, "below" to the lower
    pub placement: Option<String>,
}

impl Score {
    /// Create a new empty score.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the total number of measures across all parts.
    pub fn measure_count(&self) -> usize {
        self.parts.first().map_or(0, |p| p.measures.len())
    }
}

impl Measure {
    /// Iterate over the notes in document order.
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.elements.iter().filter_map(|e| match e {
            MeasureElement::Note(n) => Some(n),
            _ => None,
        })
    }

    /// Iterate over the directions in document order.
    pub fn directions(&self) -> impl Iterator<Item = &Direction> {
        self.elements.iter().filter_map(|e| match e {
            MeasureElement::Direction(d) => Some(d),
            _ => None,
        })
    }

    /// First `<attributes>` element, if any.
    pub fn attributes(&self) -> Option<&Attributes> {
        self.elements.iter().find_map(|e| match e {
            MeasureElement::Attributes(a) => Some(a),
            _ => None,
        })
    }
}

impl Pitch {
    /// Convert pitch to MIDI note number.
    /// Middle C (C4) = 60.
    pub fn to_midi(&self) -> i32 {
        let alter = self.alter.unwrap_or(0.0).round() as i32;
        (self.octave + 1) * 12 + step_semitone(&self.step).unwrap_or(0) + alter
    }
}

// ─── Theory helpers ──────────────────────────────────────────────────

/// Diatonic steps in order.
pub const STEPS: [&str; 7] = ["C", "D", "E", "F", "G", "A", "B"];

/// Semitone offset of a step above C.
pub fn step_semitone(step: &str) -> Option<i32> {
    Some(match step {
        "C" => 0,
        "D" => 2,
        "E" => 4,
        "F" => 5,
        "G" => 7,
        "A" => 9,
        "B" => 11,
        _ => return None,
    })
}

/// Alteration the key signature gives a step (+1 sharp, -1 flat, 0).
pub fn key_signature_alter(fifths: i32, step: &str) -> i32 {
    const SHARP_ORDER: [&str; 7] = ["F", "C", "G", "D", "A", "E", "B"];
    const FLAT_ORDER: [&str; 7] = ["B", "E", "A", "D", "G", "C", "F"];
    let count = fifths.unsigned_abs().min(7) as usize;
    if fifths > 0 && SHARP_ORDER[..count].contains(&step) {
        1
    } else if fifths < 0 && FLAT_ORDER[..count].contains(&step) {
        -1
    } else {
        0
    }
}

/// Alteration named by an `<accidental>` / `<accidental-mark>` value.
pub fn accidental_alter(accidental: &str) -> Option<i32> {
    Some(match accidental {
        "sharp" => 1,
        "flat" => -1,
        "natural" => 0,
        "double-sharp" | "sharp-sharp" => 2,
        "flat-flat" | "double-flat" => -2,
        _ => return None,
    })
}

/// Dynamic marks with their nominal MIDI velocity, softest first.
pub const DYNAMIC_LEVELS: [(&str, u8); 8] = [
    ("ppp", 16),
    ("pp", 33),
    ("p", 49),
    ("mp", 64),
    ("mf", 80),
    ("f", 96),
    ("ff", 112),
    ("fff", 127),
];

/// Nominal velocity of a dynamic mark.
pub fn dynamic_velocity(mark: &str) -> Option<u8> {
    DYNAMIC_LEVELS
        .iter()
        .find(|(name, _)| *name == mark)
        .map(|&(_, velocity)| velocity)
}

/// `<sound dynamics>` is a percentage of this velocity.
pub const FORTE_VELOCITY: f64 = 90.0;

/// Quarter-note length of a `<type>` value.
pub fn note_type_quarters(note_type: &str) -> Option<f64> {
    Some(match note_type {
        "breve" => 8.0,
        "whole" => 4.0,
        "half" => 2.0,
        "quarter" => 1.0,
        "eighth" => 0.5,
        "16th" => 0.25,
        "32nd" => 0.125,
        "64th" => 0.0625,
        _ => return None,
    })
}
