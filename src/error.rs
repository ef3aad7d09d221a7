//! Diagnostics and error types.
//!
//! Malformed MIDI input never produces an `Err`: every problem found while
//! importing is recorded as a [`Diagnostic`], either fatal (the import
//! result carries no document) or advisory (processing continues).
//! [`ScoreError`] covers the score-side failures: unreadable XML, broken
//! archives and serializer faults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of diagnostic kinds produced by the import pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    /// Missing, empty or malformed `MThd` header.
    InvalidFile,
    /// SMF format other than 0 or 1.
    UnsupportedFormat,
    /// SMPTE time division.
    UnsupportedDivision,
    /// Track chunk without `MTrk` magic or with a length past end of input.
    InvalidTrackChunk,
    /// Corrupted data inside a track body (the rest of that track is lost),
    /// or notes past the measure limit.
    EventDropped,
    /// Note-on without note-off, or note-off without note-on.
    NotePairBroken,
    /// Quantization collapsed a note to zero length.
    QuantizeClamped,
    /// Polyphony was split into more than one voice.
    PolyphonyVoiceAssigned,
    /// More than eight voices were needed.
    PolyphonyVoiceOverflow,
    /// Channel-10 notes were moved into their own percussion part.
    DrumChannelSeparated,
    /// Drum pitch with no entry in the General MIDI drum table.
    DrumNoteUnmapped,
}

impl DiagnosticCode {
    /// Whether this kind aborts the import.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            DiagnosticCode::InvalidFile
                | DiagnosticCode::UnsupportedFormat
                | DiagnosticCode::UnsupportedDivision
                | DiagnosticCode::InvalidTrackChunk
        )
    }
}

/// A single diagnostic or warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Build an advisory diagnostic and log it.
    pub(crate) fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        let diagnostic = Self::new(code, message);
        log::warn!("{:?}: {}", diagnostic.code, diagnostic.message);
        diagnostic
    }
}

/// Errors raised by the score-side entry points.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in MusicXML: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("unsupported root element '{0}', only 'score-partwise' is supported")]
    UnsupportedRoot(String),

    #[error("MXL archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("MXL archive has no MusicXML root file: {0}")]
    MissingRootFile(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MIDI serializer failed: {0}")]
    Serializer(String),
}

pub type Result<T> = std::result::Result<T, ScoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_as_screaming_snake_case() {
        let json = serde_json::to_string(&DiagnosticCode::NotePairBroken).unwrap();
        assert_eq!(json, "\"NOTE_PAIR_BROKEN\"");
        let json = serde_json::to_string(&DiagnosticCode::InvalidFile).unwrap();
        assert_eq!(json, "\"INVALID_FILE\"");
    }

    #[test]
    fn only_framing_problems_are_fatal() {
        assert!(DiagnosticCode::UnsupportedDivision.is_fatal());
        assert!(DiagnosticCode::InvalidTrackChunk.is_fatal());
        assert!(!DiagnosticCode::EventDropped.is_fatal());
        assert!(!DiagnosticCode::DrumNoteUnmapped.is_fatal());
    }
}
