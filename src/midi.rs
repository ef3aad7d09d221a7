//! MIDI file generation from extracted score events.
//!
//! [`MidiEncoder`] turns an [`Extraction`] into ordered track descriptors:
//! a meta track (time signature, key signature, tempo), one note track per
//! part, and one controller track per (part, channel).  The byte layout is
//! left to a [`MidiSerializer`]; [`SmfWriter`] produces a Standard MIDI
//! File, format 1.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use crate::error::{Result, ScoreError};
use crate::extract::{ControllerChange, Extraction, PlaybackEvent, DRUM_CHANNEL};
use crate::options::ExportOptions;

// ═══════════════════════════════════════════════════════════════════════
// Track descriptors
// ═══════════════════════════════════════════════════════════════════════

/// Length of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationToken {
    /// Note value as a fraction of a whole note: 1, 2, 4, 8, 16, …
    Value(u32),
    /// Exact length in ticks
    Ticks(u64),
}

impl DurationToken {
    pub fn ticks(self, ticks_per_quarter: u16) -> u64 {
        match self {
            DurationToken::Value(v) => u64::from(ticks_per_quarter) * 4 / u64::from(v.max(1)),
            DurationToken::Ticks(t) => t,
        }
    }
}

/// A note placed at an absolute tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub pitch: u8,
    pub duration: DurationToken,
    pub start_tick: u64,
    pub velocity: u8,
    /// 1-based
    pub channel: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramChangeEvent {
    /// 1-based
    pub channel: u8,
    /// 0-based GM program
    pub instrument: u8,
    pub delta: u64,
}

/// Control change; `status` is 0xB0 on channel 1 until moved with
/// [`ControllerChangeEvent::on_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerChangeEvent {
    pub number: u8,
    pub value: u8,
    pub delta: u64,
    pub status: u8,
}

impl ControllerChangeEvent {
    pub fn new(number: u8, value: u8, delta: u64) -> Self {
        Self {
            number,
            value,
            delta,
            status: 0xB0,
        }
    }

    /// Retarget to a 1-based channel.
    pub fn on_channel(mut self, channel: u8) -> Self {
        self.status = 0xB0 | (channel.saturating_sub(1) & 0x0F);
        self
    }
}

/// Timeline meta event kinds, in their order at a shared tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimelineMeta {
    TimeSignature { beats: u8, beat_type: u8 },
    KeySignature { fifths: i8, minor: bool },
    Tempo { bpm: f64 },
}

impl TimelineMeta {
    fn priority(&self) -> u8 {
        match self {
            TimelineMeta::TimeSignature { .. } => 0,
            TimelineMeta::KeySignature { .. } => 1,
            TimelineMeta::Tempo { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetaDescriptor {
    pub meta: TimelineMeta,
    pub delta: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    Note(NoteEvent),
    ProgramChange(ProgramChangeEvent),
    Controller(ControllerChangeEvent),
    Meta(MetaDescriptor),
}

/// One output track.  Notes are placed by `start_tick`; every other event
/// by its delta from the previous non-note event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackDescriptor {
    pub name: String,
    pub events: Vec<TrackEvent>,
}

/// Byte-assembly backend for encoded tracks.
pub trait MidiSerializer {
    fn write(&self, ticks_per_quarter: u16, tracks: &[TrackDescriptor]) -> Result<Vec<u8>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Encoder
// ═══════════════════════════════════════════════════════════════════════

/// GM programs (0-based) by track-name keyword; first match wins.
const INSTRUMENT_PRESETS: [(&str, u8); 38] = [
    ("electric piano", 4),
    ("harpsichord", 6),
    ("celesta", 8),
    ("glockenspiel", 9),
    ("vibraphone", 11),
    ("marimba", 12),
    ("xylophone", 13),
    ("organ", 19),
    ("accordion", 21),
    ("harmonica", 22),
    ("electric guitar", 27),
    ("distortion", 30),
    ("acoustic bass", 32),
    ("double bass", 43),
    ("contrabass", 43),
    ("bassoon", 70),
    ("bass", 33),
    ("guitar", 24),
    ("violin", 40),
    ("viola", 41),
    ("cello", 42),
    ("harp", 46),
    ("strings", 48),
    ("choir", 52),
    ("voice", 52),
    ("trumpet", 56),
    ("trombone", 57),
    ("tuba", 58),
    ("english horn", 69),
    ("horn", 60),
    ("soprano sax", 64),
    ("tenor sax", 66),
    ("sax", 65),
    ("oboe", 68),
    ("clarinet", 71),
    ("piccolo", 72),
    ("flute", 73),
    ("recorder", 74),
];

/// Preset program for a track name, 0 (acoustic grand) when nothing matches.
pub fn preset_program(track_name: &str) -> u8 {
    let lower = track_name.to_lowercase();
    INSTRUMENT_PRESETS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map_or(0, |&(_, program)| program)
}

/// Builds track descriptors from an extraction and hands them to `S`.
#[derive(Debug, Clone)]
pub struct MidiEncoder<S: MidiSerializer> {
    serializer: S,
    ticks_per_quarter: u16,
    program_overrides: BTreeMap<String, u8>,
}

impl<S: MidiSerializer> MidiEncoder<S> {
    pub fn new(serializer: S, options: &ExportOptions) -> Self {
        Self {
            serializer,
            ticks_per_quarter: options.ticks_per_quarter.max(1),
            program_overrides: options.program_overrides.clone(),
        }
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }

    /// Meta track, then note tracks by track id, then controller tracks.
    pub fn build_tracks(&self, extraction: &Extraction) -> Vec<TrackDescriptor> {
        let mut tracks = vec![meta_track(extraction)];

        let mut by_track: BTreeMap<&str, Vec<&PlaybackEvent>> = BTreeMap::new();
        for event in &extraction.events {
            by_track.entry(event.track_id.as_str()).or_default().push(event);
        }
        for (track_id, events) in by_track {
            tracks.push(self.note_track(track_id, events, extraction));
        }

        let mut by_channel: BTreeMap<(&str, u8), Vec<&ControllerChange>> = BTreeMap::new();
        for change in &extraction.controllers {
            by_channel
                .entry((change.track_id.as_str(), change.channel))
                .or_default()
                .push(change);
        }
        for ((track_id, channel), changes) in by_channel {
            tracks.push(controller_track(track_id, channel, changes));
        }

        tracks
    }

    /// Encode `extraction` to bytes.
    pub fn encode(&self, extraction: &Extraction) -> Result<Vec<u8>> {
        let tracks = self.build_tracks(extraction);
        let bytes = self.serializer.write(self.ticks_per_quarter, &tracks)?;
        info!(
            "encoded {} tracks, {} notes into {} bytes",
            tracks.len(),
            extraction.events.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    fn note_track(
        &self,
        track_id: &str,
        mut events: Vec<&PlaybackEvent>,
        extraction: &Extraction,
    ) -> TrackDescriptor {
        let name = events
            .first()
            .map_or_else(|| track_id.to_string(), |e| e.track_name.clone());

        let channels: BTreeSet<u8> = events.iter().map(|e| e.channel).collect();
        let program = self
            .program_overrides
            .get(track_id)
            .or_else(|| extraction.programs.get(track_id))
            .copied()
            .unwrap_or_else(|| preset_program(&name));

        let mut out: Vec<TrackEvent> = channels
            .into_iter()
            .filter(|c| *c != DRUM_CHANNEL)
            .map(|channel| {
                TrackEvent::ProgramChange(ProgramChangeEvent {
                    channel,
                    instrument: program.min(127),
                    delta: 0,
                })
            })
            .collect();

        events.sort_by_key(|e| (e.start_ticks, e.pitch));
        out.extend(events.into_iter().map(|e| {
            TrackEvent::Note(NoteEvent {
                pitch: e.pitch,
                duration: DurationToken::Ticks(e.dur_ticks),
                start_tick: e.start_ticks,
                velocity: e.velocity,
                channel: e.channel,
            })
        }));

        debug!("note track {track_id} ({name}): program {program}, {} events", out.len());
        TrackDescriptor { name, events: out }
    }
}

impl Default for MidiEncoder<SmfWriter> {
    fn default() -> Self {
        Self::new(SmfWriter, &ExportOptions::default())
    }
}

/// Time signatures, keys and tempos, deduplicated per (kind, tick), with
/// 4/4, C major and 120 bpm at tick 0 unless given.
fn meta_track(extraction: &Extraction) -> TrackDescriptor {
    let mut entries: Vec<(u64, TimelineMeta)> = Vec::new();
    entries.extend(extraction.time_signatures.iter().map(|t| {
        (
            t.tick,
            TimelineMeta::TimeSignature {
                beats: t.beats,
                beat_type: t.beat_type,
            },
        )
    }));
    entries.extend(extraction.key_signatures.iter().map(|k| {
        (
            k.tick,
            TimelineMeta::KeySignature {
                fifths: k.fifths,
                minor: k.minor,
            },
        )
    }));
    entries.extend(
        extraction
            .tempo_events
            .iter()
            .map(|t| (t.tick, TimelineMeta::Tempo { bpm: t.bpm })),
    );

    let defaults = [
        TimelineMeta::TimeSignature {
            beats: 4,
            beat_type: 4,
        },
        TimelineMeta::KeySignature {
            fifths: 0,
            minor: false,
        },
        TimelineMeta::Tempo { bpm: 120.0 },
    ];
    for default in defaults {
        let present = entries
            .iter()
            .any(|(tick, m)| *tick == 0 && m.priority() == default.priority());
        if !present {
            entries.push((0, default));
        }
    }

    entries.sort_by_key(|(tick, m)| (*tick, m.priority()));
    entries.dedup_by_key(|(tick, m)| (*tick, m.priority()));

    let mut last = 0;
    let events = entries
        .into_iter()
        .map(|(tick, meta)| {
            let delta = tick - last;
            last = tick;
            TrackEvent::Meta(MetaDescriptor { meta, delta })
        })
        .collect();
    TrackDescriptor {
        name: "Tempo".to_string(),
        events,
    }
}

fn controller_track(track_id: &str, channel: u8, mut changes: Vec<&ControllerChange>) -> TrackDescriptor {
    changes.sort_by_key(|c| c.tick);
    let mut last = 0;
    let events = changes
        .into_iter()
        .map(|c| {
            let delta = c.tick - last;
            last = c.tick;
            TrackEvent::Controller(ControllerChangeEvent::new(c.controller, c.value, delta).on_channel(channel))
        })
        .collect();
    TrackDescriptor {
        name: format!("{track_id} controllers"),
        events,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// SMF byte encoding
// ═══════════════════════════════════════════════════════════════════════

/// Largest value a four-byte VLQ holds.
const MAX_VLQ: u64 = 0x0FFF_FFFF;

/// Standard MIDI File writer, format 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmfWriter;

impl MidiSerializer for SmfWriter {
    fn write(&self, ticks_per_quarter: u16, tracks: &[TrackDescriptor]) -> Result<Vec<u8>> {
        if ticks_per_quarter == 0 || ticks_per_quarter > 0x7FFF {
            return Err(ScoreError::Serializer(format!(
                "ticks per quarter {ticks_per_quarter} out of range"
            )));
        }
        let chunks = tracks
            .iter()
            .map(|t| encode_track(t, ticks_per_quarter))
            .collect::<Result<Vec<_>>>()?;
        build_smf(ticks_per_quarter, &chunks)
    }
}

/// A raw MIDI message at an absolute tick.
#[derive(Debug, Clone)]
struct MidiEvent {
    tick: u64,
    /// Ordering among events on the same tick
    rank: u8,
    bytes: Vec<u8>,
}

fn build_smf(ticks_per_quarter: u16, tracks: &[Vec<u8>]) -> Result<Vec<u8>> {
    let count = u16::try_from(tracks.len())
        .map_err(|_| ScoreError::Serializer(format!("too many tracks ({})", tracks.len())))?;
    let mut out = Vec::new();

    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(&ticks_per_quarter.to_be_bytes());

    for track_data in tracks {
        let len = u32::try_from(track_data.len())
            .map_err(|_| ScoreError::Serializer("track chunk too large".to_string()))?;
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(track_data);
    }

    Ok(out)
}

fn channel_nibble(channel: u8) -> Result<u8> {
    match channel {
        1..=16 => Ok(channel - 1),
        _ => Err(ScoreError::Serializer(format!("channel {channel} out of range"))),
    }
}

fn data_byte(value: u8, what: &str) -> Result<u8> {
    if value > 127 {
        return Err(ScoreError::Serializer(format!("{what} {value} out of range")));
    }
    Ok(value)
}

fn meta_bytes(meta: TimelineMeta) -> Vec<u8> {
    match meta {
        TimelineMeta::Tempo { bpm } => {
            let uspq = (60_000_000.0 / bpm.max(1.0)).round().min(f64::from(0xFF_FFFF)) as u32;
            vec![
                0xFF,
                0x51,
                0x03,
                ((uspq >> 16) & 0xFF) as u8,
                ((uspq >> 8) & 0xFF) as u8,
                (uspq & 0xFF) as u8,
            ]
        }
        TimelineMeta::TimeSignature { beats, beat_type } => {
            let pow = beat_type.max(1).ilog2() as u8;
            vec![0xFF, 0x58, 0x04, beats, pow, 24, 8]
        }
        TimelineMeta::KeySignature { fifths, minor } => {
            vec![0xFF, 0x59, 0x02, fifths as u8, u8::from(minor)]
        }
    }
}

/// Encode a track's events into raw MTrk bytes (delta-time encoded).
fn encode_track(track: &TrackDescriptor, ticks_per_quarter: u16) -> Result<Vec<u8>> {
    let mut events: Vec<MidiEvent> = Vec::new();
    let mut cursor = 0u64;

    for event in &track.events {
        match event {
            TrackEvent::Meta(m) => {
                cursor += m.delta;
                events.push(MidiEvent {
                    tick: cursor,
                    rank: 0,
                    bytes: meta_bytes(m.meta),
                });
            }
            TrackEvent::ProgramChange(p) => {
                cursor += p.delta;
                events.push(MidiEvent {
                    tick: cursor,
                    rank: 1,
                    bytes: vec![0xC0 | channel_nibble(p.channel)?, data_byte(p.instrument, "program")?],
                });
            }
            TrackEvent::Controller(c) => {
                cursor += c.delta;
                events.push(MidiEvent {
                    tick: cursor,
                    rank: 2,
                    bytes: vec![
                        c.status,
                        data_byte(c.number, "controller")?,
                        data_byte(c.value, "controller value")?,
                    ],
                });
            }
            TrackEvent::Note(n) => {
                let ch = channel_nibble(n.channel)?;
                let pitch = data_byte(n.pitch, "pitch")?;
                let velocity = n.velocity.clamp(1, 127);
                let end = n.start_tick + n.duration.ticks(ticks_per_quarter).max(1);
                events.push(MidiEvent {
                    tick: n.start_tick,
                    rank: 4,
                    bytes: vec![0x90 | ch, pitch, velocity],
                });
                events.push(MidiEvent {
                    tick: end,
                    rank: 3,
                    bytes: vec![0x80 | ch, pitch, 0],
                });
            }
        }
    }

    let mut data = Vec::new();

    if !track.name.is_empty() {
        let name_bytes = track.name.as_bytes();
        data.push(0x00);
        data.push(0xFF);
        data.push(0x03);
        write_vlq(&mut data, name_bytes.len() as u64)?;
        data.extend_from_slice(name_bytes);
    }

    events.sort_by_key(|e| (e.tick, e.rank));

    let mut last_tick = 0u64;
    for event in &events {
        write_vlq(&mut data, event.tick - last_tick)?;
        data.extend_from_slice(&event.bytes);
        last_tick = event.tick;
    }

    data.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
    Ok(data)
}

/// Write a variable-length quantity (VLQ) to a byte vector.
fn write_vlq(out: &mut Vec<u8>, value: u64) -> Result<()> {
    if value > MAX_VLQ {
        return Err(ScoreError::Serializer(format!("delta {value} exceeds VLQ range")));
    }
    let mut value = value as u32;
    let mut buf = [0u8; 4];
    let mut i = 0;
    loop {
        buf[i] = (value & 0x7F) as u8;
        if i > 0 {
            buf[i] |= 0x80;
        }
        value >>= 7;
        i += 1;
        if value == 0 {
            break;
        }
    }
    out.extend(buf[..i].iter().rev());
    Ok(())
}
