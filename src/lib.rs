//! scorelib: bidirectional MIDI ⇄ MusicXML translation.
//!
//! Import turns a Standard MIDI File into a `score-partwise` document with
//! spelled pitches, voices, staves and tied durations.  Export reads
//! MusicXML (.musicxml or compressed .mxl), flattens its notation into
//! timed playback events and encodes them as a Standard MIDI File.
//!
//! # Example
//! ```no_run
//! use scorelib::{export_midi, import_midi, parse_file, ExportOptions, ImportOptions};
//!
//! let bytes = std::fs::read("song.mid").unwrap();
//! let result = import_midi(&bytes, &ImportOptions::default());
//! if let Some(doc) = &result.document {
//!     println!("{doc}");
//! }
//!
//! let score = parse_file("path/to/score.musicxml").unwrap();
//! let midi = export_midi(&score, &ExportOptions::default()).unwrap();
//! println!("{} bytes", midi.len());
//! ```

pub mod assembler;
pub mod drums;
pub mod duration;
pub mod error;
pub mod extract;
pub mod import;
pub mod midi;
pub mod model;
pub mod mxl;
pub mod options;
pub mod parser;
pub mod quantize;
pub mod smf;
pub mod writer;

use std::path::Path;

pub use error::{Diagnostic, DiagnosticCode, Result, ScoreError};
pub use extract::{extract, Extraction, PlaybackEvent};
pub use import::{import_midi, ImportResult};
pub use midi::{MidiEncoder, MidiSerializer, SmfWriter};
pub use model::*;
pub use mxl::parse_mxl;
pub use options::{AccentProfile, ExportOptions, GraceTimingMode, ImportOptions, PlaybackMode};
pub use parser::parse_musicxml;
pub use quantize::QuantizeGrid;
pub use writer::{write_musicxml, WriterOptions};

/// Parse a MusicXML file from a file path.
/// Automatically detects format based on file extension:
/// - `.musicxml` or `.xml` → uncompressed MusicXML
/// - `.mxl` → compressed MXL (ZIP archive)
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Score> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    parse_bytes(&data, path.extension().and_then(|e| e.to_str()))
}

/// Parse MusicXML from raw bytes with an optional format hint.
/// If `extension` is None, tries to auto-detect the format.
pub fn parse_bytes(data: &[u8], extension: Option<&str>) -> Result<Score> {
    match extension {
        Some("mxl") => parse_mxl(data),
        Some("musicxml") | Some("xml") => parse_musicxml(std::str::from_utf8(data)?),
        _ => {
            // Auto-detect: try as XML first, then as MXL
            if let Ok(xml) = std::str::from_utf8(data) {
                if xml.trim_start().starts_with('<') {
                    return parse_musicxml(xml);
                }
            }
            parse_mxl(data)
        }
    }
}

/// Convert a parsed score to a JSON string.
/// Useful for passing data across FFI boundaries.
pub fn score_to_json(score: &Score) -> Result<String> {
    Ok(serde_json::to_string_pretty(score)?)
}

/// Import a MIDI file from disk.
pub fn import_file<P: AsRef<Path>>(path: P, options: &ImportOptions) -> Result<ImportResult> {
    let data = std::fs::read(path)?;
    Ok(import_midi(&data, options))
}

/// Encode a score as a Standard MIDI File with the bundled writer.
pub fn export_midi(score: &Score, options: &ExportOptions) -> Result<Vec<u8>> {
    export_midi_with(score, options, SmfWriter)
}

/// Encode a score through a caller-supplied serializer.
pub fn export_midi_with<S: MidiSerializer>(
    score: &Score,
    options: &ExportOptions,
    serializer: S,
) -> Result<Vec<u8>> {
    let encoder = MidiEncoder::new(serializer, options);
    let extraction = extract(score, encoder.ticks_per_quarter(), options);
    encoder.encode(&extraction)
}

/// Parse MusicXML or MXL bytes and encode them as MIDI.
pub fn export_bytes(data: &[u8], extension: Option<&str>, options: &ExportOptions) -> Result<Vec<u8>> {
    let score = parse_bytes(data, extension)?;
    export_midi(&score, options)
}
