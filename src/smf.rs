//! Standard MIDI File decoder.
//!
//! Parses raw SMF bytes into header metadata and per-track note, controller,
//! program and meta events.  Header and chunk framing problems are fatal;
//! anything wrong inside a track body only stops that track and is reported
//! as a warning.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Diagnostic, DiagnosticCode};

// ═══════════════════════════════════════════════════════════════════════
// Decoded data
// ═══════════════════════════════════════════════════════════════════════

/// `MThd` contents.  Only PPQ division is representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmfHeader {
    /// 0 (single track) or 1 (parallel tracks)
    pub format: u16,
    /// Number of track chunks declared by the header
    pub track_count: u16,
    /// Ticks per quarter note (always > 0)
    pub ticks_per_quarter: u16,
}

/// A note built from a note-on/note-off pair within one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNoteEvent {
    pub track_index: usize,
    /// MIDI channel, 1-based (1–16)
    pub channel: u8,
    pub pitch: u8,
    /// Absolute tick of the note-on
    pub start_tick: u64,
    /// Absolute tick of the note-off
    pub end_tick: u64,
    pub velocity: u8,
}

/// A retained controller change (CC7 volume or CC11 expression on import).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerEvent {
    pub track_index: usize,
    pub channel: u8,
    pub tick: u64,
    pub controller: u8,
    pub value: u8,
}

/// Tempo, time signature and key signature meta events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetaEvent {
    Tempo { tick: u64, bpm: f64 },
    TimeSignature { tick: u64, beats: u8, beat_type: u8 },
    KeySignature { tick: u64, fifths: i8, minor: bool },
}

impl MetaEvent {
    pub fn tick(&self) -> u64 {
        match *self {
            MetaEvent::Tempo { tick, .. }
            | MetaEvent::TimeSignature { tick, .. }
            | MetaEvent::KeySignature { tick, .. } => tick,
        }
    }
}

/// First program change seen for a (track, channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEvent {
    pub track_index: usize,
    pub channel: u8,
    /// 1-based program number (MusicXML `<midi-program>` convention)
    pub program: u8,
}

/// Everything the decoder recovers from one file.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedSmf {
    pub header: SmfHeader,
    pub notes: Vec<RawNoteEvent>,
    pub controllers: Vec<ControllerEvent>,
    pub metas: Vec<MetaEvent>,
    pub programs: Vec<ProgramEvent>,
    /// First track-name meta event per track
    pub track_names: HashMap<usize, String>,
    /// Advisory diagnostics; decoding still succeeded
    pub warnings: Vec<Diagnostic>,
}

// ═══════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════

/// Tempo range accepted from `FF 51` events, in BPM.
const MIN_BPM: f64 = 20.0;
const MAX_BPM: f64 = 300.0;

/// Decode a Standard MIDI File.
///
/// Returns the fatal diagnostics when the header or the chunk framing is
/// unusable.  Corruption inside a track body is not fatal: that track stops
/// early with an `EVENT_DROPPED` warning and the remaining tracks still
/// parse.
pub fn decode(data: &[u8]) -> Result<DecodedSmf, Vec<Diagnostic>> {
    let mut cursor = ByteCursor::new(data);
    let header = read_header(&mut cursor).map_err(|d| vec![d])?;

    let mut decoded = DecodedSmf {
        header,
        notes: Vec::new(),
        controllers: Vec::new(),
        metas: Vec::new(),
        programs: Vec::new(),
        track_names: HashMap::new(),
        warnings: Vec::new(),
    };

    for track_index in 0..header.track_count as usize {
        if cursor.remaining() == 0 {
            log::debug!(
                "header declares {} tracks, file ends after {}",
                header.track_count,
                track_index
            );
            break;
        }
        let body = read_track_chunk(&mut cursor, track_index).map_err(|d| vec![d])?;
        decode_track(track_index, body, &mut decoded);
    }

    decoded.notes.sort_by_key(|n| (n.start_tick, n.track_index, n.channel, n.pitch));
    log::debug!(
        "decoded format {} file: {} tracks, {} notes, {} warnings",
        header.format,
        header.track_count,
        decoded.notes.len(),
        decoded.warnings.len()
    );
    Ok(decoded)
}

// ─── Chunk framing ───────────────────────────────────────────────────

fn read_header(cursor: &mut ByteCursor) -> Result<SmfHeader, Diagnostic> {
    let invalid = |msg: &str| Diagnostic::new(DiagnosticCode::InvalidFile, msg);

    if cursor.remaining() == 0 {
        return Err(invalid("empty input"));
    }
    if cursor.read_bytes(4) != Some(&b"MThd"[..]) {
        return Err(invalid("missing MThd header"));
    }
    let length = cursor
        .read_u32()
        .ok_or_else(|| invalid("truncated header"))? as usize;
    if length < 6 {
        return Err(invalid("header chunk shorter than 6 bytes"));
    }
    let body = cursor
        .read_bytes(length)
        .ok_or_else(|| invalid("truncated header"))?;

    let format = u16::from_be_bytes([body[0], body[1]]);
    let track_count = u16::from_be_bytes([body[2], body[3]]);
    let division = u16::from_be_bytes([body[4], body[5]]);

    if format > 1 {
        return Err(Diagnostic::new(
            DiagnosticCode::UnsupportedFormat,
            format!("SMF format {format} is not supported"),
        ));
    }
    if division & 0x8000 != 0 {
        return Err(Diagnostic::new(
            DiagnosticCode::UnsupportedDivision,
            "SMPTE time division is not supported",
        ));
    }
    if division == 0 {
        return Err(invalid("ticks per quarter must be positive"));
    }

    Ok(SmfHeader {
        format,
        track_count,
        ticks_per_quarter: division,
    })
}

fn read_track_chunk<'a>(
    cursor: &mut ByteCursor<'a>,
    track_index: usize,
) -> Result<&'a [u8], Diagnostic> {
    let bad = |msg: String| Diagnostic::new(DiagnosticCode::InvalidTrackChunk, msg);

    if cursor.read_bytes(4) != Some(&b"MTrk"[..]) {
        return Err(bad(format!("track {track_index}: missing MTrk chunk")));
    }
    let length = cursor
        .read_u32()
        .ok_or_else(|| bad(format!("track {track_index}: truncated chunk length")))?
        as usize;
    cursor.read_bytes(length).ok_or_else(|| {
        bad(format!(
            "track {track_index}: declared length {length} exceeds remaining {} bytes",
            cursor.remaining()
        ))
    })
}

// ─── Track body ──────────────────────────────────────────────────────

/// Per-track pairing state: open note-ons per (channel, pitch), LIFO.
type OpenNotes = HashMap<(u8, u8), Vec<(u64, u8)>>;

fn decode_track(track_index: usize, body: &[u8], out: &mut DecodedSmf) {
    let mut cursor = ByteCursor::new(body);
    let mut tick: u64 = 0;
    let mut running_status: Option<u8> = None;
    let mut open: OpenNotes = HashMap::new();
    let first_note = out.notes.len();

    let drop_rest = |out: &mut DecodedSmf, tick: u64, what: &str| {
        out.warnings.push(Diagnostic::warning(
            DiagnosticCode::EventDropped,
            format!("track {track_index}: {what} at tick {tick}; rest of track dropped"),
        ));
    };

    while cursor.remaining() > 0 {
        let Some(delta) = cursor.read_vlq() else {
            drop_rest(out, tick, "invalid delta time");
            break;
        };
        tick += u64::from(delta);

        let Some(next) = cursor.peek() else {
            drop_rest(out, tick, "missing status byte");
            break;
        };
        let status = if next & 0x80 == 0 {
            match running_status {
                Some(status) => status,
                None => {
                    drop_rest(out, tick, "data byte without running status");
                    break;
                }
            }
        } else {
            cursor.advance(1);
            next
        };

        match status {
            0xFF => {
                running_status = None;
                let meta_type = cursor.read_u8();
                let payload = cursor
                    .read_vlq()
                    .and_then(|len| cursor.read_bytes(len as usize));
                let (Some(meta_type), Some(payload)) = (meta_type, payload) else {
                    drop_rest(out, tick, "meta event length overflow");
                    break;
                };
                if meta_type == 0x2F {
                    break;
                }
                handle_meta(track_index, tick, meta_type, payload, out);
            }
            0xF0 | 0xF7 => {
                running_status = None;
                let skipped = cursor
                    .read_vlq()
                    .and_then(|len| cursor.read_bytes(len as usize));
                if skipped.is_none() {
                    drop_rest(out, tick, "sysex length overflow");
                    break;
                }
            }
            0xF1..=0xFE => {
                drop_rest(out, tick, &format!("unexpected status 0x{status:02X}"));
                break;
            }
            _ => {
                running_status = Some(status);
                let data_len = match status & 0xF0 {
                    0xC0 | 0xD0 => 1,
                    _ => 2,
                };
                let Some(data) = cursor.read_bytes(data_len) else {
                    drop_rest(out, tick, "truncated channel message");
                    break;
                };
                handle_channel_message(track_index, tick, status, data, &mut open, out);
            }
        }
    }

    let mut orphans: Vec<((u8, u8), (u64, u8))> = open
        .into_iter()
        .flat_map(|(key, starts)| starts.into_iter().map(move |s| (key, s)))
        .collect();
    orphans.sort();
    for ((channel, pitch), (start, _)) in orphans {
        out.warnings.push(Diagnostic::warning(
            DiagnosticCode::NotePairBroken,
            format!(
                "track {track_index}: note-on without note-off (channel {channel}, pitch {pitch}, tick {start})"
            ),
        ));
    }

    log::debug!(
        "track {track_index}: {} notes, end tick {tick}",
        out.notes.len() - first_note
    );
}

fn handle_channel_message(
    track_index: usize,
    tick: u64,
    status: u8,
    data: &[u8],
    open: &mut OpenNotes,
    out: &mut DecodedSmf,
) {
    let channel = (status & 0x0F) + 1;
    match status & 0xF0 {
        0x90 if data[1] > 0 => {
            open.entry((channel, data[0]))
                .or_default()
                .push((tick, data[1]));
        }
        0x80 | 0x90 => {
            let pitch = data[0];
            match open.get_mut(&(channel, pitch)).and_then(|stack| stack.pop()) {
                Some((start_tick, velocity)) => out.notes.push(RawNoteEvent {
                    track_index,
                    channel,
                    pitch,
                    start_tick,
                    end_tick: tick,
                    velocity,
                }),
                None => out.warnings.push(Diagnostic::warning(
                    DiagnosticCode::NotePairBroken,
                    format!(
                        "track {track_index}: note-off without note-on (channel {channel}, pitch {pitch}, tick {tick})"
                    ),
                )),
            }
        }
        0xB0 => {
            if matches!(data[0], 7 | 11) {
                out.controllers.push(ControllerEvent {
                    track_index,
                    channel,
                    tick,
                    controller: data[0],
                    value: data[1] & 0x7F,
                });
            }
        }
        0xC0 => {
            let seen = out
                .programs
                .iter()
                .any(|p| p.track_index == track_index && p.channel == channel);
            if !seen {
                out.programs.push(ProgramEvent {
                    track_index,
                    channel,
                    program: (data[0] & 0x7F) + 1,
                });
            }
        }
        _ => {}
    }
}

fn handle_meta(track_index: usize, tick: u64, meta_type: u8, payload: &[u8], out: &mut DecodedSmf) {
    match meta_type {
        0x03 => {
            out.track_names
                .entry(track_index)
                .or_insert_with(|| String::from_utf8_lossy(payload).trim().to_string());
        }
        0x51 if payload.len() >= 3 => {
            let micros = u32::from_be_bytes([0, payload[0], payload[1], payload[2]]);
            if micros > 0 {
                let bpm = (60_000_000.0 / f64::from(micros)).round().clamp(MIN_BPM, MAX_BPM);
                out.metas.push(MetaEvent::Tempo { tick, bpm });
            }
        }
        0x58 if payload.len() >= 2 && payload[1] <= 7 && payload[0] > 0 => {
            out.metas.push(MetaEvent::TimeSignature {
                tick,
                beats: payload[0],
                beat_type: 1 << payload[1],
            });
        }
        0x59 if payload.len() >= 2 => {
            out.metas.push(MetaEvent::KeySignature {
                tick,
                fifths: (payload[0] as i8).clamp(-7, 7),
                minor: payload[1] == 1,
            });
        }
        _ => {}
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Byte cursor
// ═══════════════════════════════════════════════════════════════════════

struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
    }

    fn read_u8(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn read_u32(&mut self) -> Option<u32> {
        let b = self.read_bytes(4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.remaining() {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    /// Variable-length quantity, at most 4 bytes.
    fn read_vlq(&mut self) -> Option<u32> {
        let mut value: u32 = 0;
        for _ in 0..4 {
            let b = self.read_u8()?;
            value = (value << 7) | u32::from(b & 0x7F);
            if b & 0x80 == 0 {
                return Some(value);
            }
        }
        None
    }
}
