//! Sounding-pitch resolution for pitched and percussion notes.

use std::collections::HashMap;

use crate::drums;
use crate::model::*;

/// Accidentals in force for the rest of the measure, keyed by
/// (index into [`STEPS`], octave).
pub(crate) type MeasureCarry = HashMap<(usize, i32), i32>;

fn step_index(step: &str) -> Option<usize> {
    STEPS.iter().position(|s| *s == step)
}

fn midi_of(step_idx: usize, octave: i32, alter: i32) -> i32 {
    (octave + 1) * 12 + step_semitone(STEPS[step_idx]).unwrap_or(0) + alter
}

/// Written MIDI pitch of a pitched note.
///
/// The alteration comes from `<alter>`, then `<accidental>`, then an
/// accidental carried earlier in the measure, then the key signature.  An
/// explicit accidental is remembered for later notes on the same line.
pub(crate) fn resolve_pitched(
    pitch: &Pitch,
    accidental: Option<&str>,
    fifths: i32,
    carry: &mut MeasureCarry,
) -> Option<i32> {
    let idx = step_index(&pitch.step)?;
    let key = (idx, pitch.octave);
    let marked = accidental.and_then(accidental_alter);

    let alter = match (pitch.alter, marked) {
        (Some(a), _) => a.round() as i32,
        (None, Some(a)) => a,
        (None, None) => carry
            .get(&key)
            .copied()
            .unwrap_or_else(|| key_signature_alter(fifths, &pitch.step)),
    };
    if marked.is_some() {
        carry.insert(key, alter);
    }
    Some(midi_of(idx, pitch.octave, alter))
}

/// Diatonic neighbour of `pitch` for ornaments.
///
/// An `<accidental-mark>` placed above (or unplaced) alters the upper
/// neighbour, one placed below the lower.  When the result is not one or
/// two semitones away in the right direction, a whole step is used.
pub(crate) fn neighbor(
    pitch: &Pitch,
    principal: i32,
    upper: bool,
    fifths: i32,
    carry: &MeasureCarry,
    marks: &[AccidentalMark],
) -> i32 {
    let fallback = if upper { principal + 2 } else { principal - 2 };
    let Some(idx) = step_index(&pitch.step) else {
        return fallback;
    };
    let (n_idx, n_oct) = match (upper, idx) {
        (true, 6) => (0, pitch.octave + 1),
        (true, i) => (i + 1, pitch.octave),
        (false, 0) => (6, pitch.octave - 1),
        (false, i) => (i - 1, pitch.octave),
    };

    let wanted = if upper { "above" } else { "below" };
    let marked = marks
        .iter()
        .find(|m| m.placement.as_deref().unwrap_or("above") == wanted)
        .and_then(|m| accidental_alter(&m.value));
    let alter = marked
        .or_else(|| carry.get(&(n_idx, n_oct)).copied())
        .unwrap_or_else(|| key_signature_alter(fifths, STEPS[n_idx]));

    let candidate = midi_of(n_idx, n_oct, alter);
    let gap = candidate - principal;
    let fits = if upper {
        (1..=2).contains(&gap)
    } else {
        (-2..=-1).contains(&gap)
    };
    if fits {
        candidate
    } else {
        fallback
    }
}

/// GM note for a percussion note.
///
/// Tries, in order: the referenced instrument's `<midi-unpitched>`, the
/// displayed staff position, the instrument name against the drum name
/// table, the part's first unpitched instrument, and finally the written
/// pitch (acoustic snare when there is none).
pub(crate) fn resolve_drum(note: &Note, part: &Part) -> i32 {
    let instrument = note
        .instrument
        .as_ref()
        .and_then(|id| part.instruments.iter().find(|i| &i.id == id));

    if let Some(unpitched) = instrument.and_then(|i| i.midi_unpitched) {
        return unpitched - 1;
    }
    if let Some(u) = &note.unpitched {
        if let (Some(step), Some(octave)) = (&u.display_step, u.display_octave) {
            if let Some(idx) = step_index(step) {
                return midi_of(idx, octave, 0);
            }
        }
    }
    if let Some(pitch) = instrument.and_then(|i| drums::drum_from_name(&i.name)) {
        return i32::from(pitch);
    }
    if let Some(unpitched) = part.instruments.iter().find_map(|i| i.midi_unpitched) {
        return unpitched - 1;
    }
    note.pitch.as_ref().map_or(38, Pitch::to_midi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pitch(step: &str, octave: i32, alter: Option<f64>) -> Pitch {
        Pitch {
            step: step.into(),
            octave,
            alter,
        }
    }

    #[test]
    fn explicit_alter_wins() {
        let mut carry = MeasureCarry::new();
        let p = pitch("F", 4, Some(0.0));
        assert_eq!(resolve_pitched(&p, None, 1, &mut carry), Some(65));
    }

    #[test]
    fn accidental_then_carry_then_key() {
        let mut carry = MeasureCarry::new();
        // G major: F defaults to F#
        assert_eq!(resolve_pitched(&pitch("F", 4, None), None, 1, &mut carry), Some(66));
        // natural sign is carried through the measure
        assert_eq!(resolve_pitched(&pitch("F", 4, None), Some("natural"), 1, &mut carry), Some(65));
        assert_eq!(resolve_pitched(&pitch("F", 4, None), None, 1, &mut carry), Some(65));
        // other octaves keep the key default
        assert_eq!(resolve_pitched(&pitch("F", 5, None), None, 1, &mut carry), Some(78));
    }

    #[test]
    fn neighbours_follow_key() {
        let carry = MeasureCarry::new();
        let e = pitch("E", 4, None);
        // C major: E-F is a half step, E-D a whole step
        assert_eq!(neighbor(&e, 64, true, 0, &carry, &[]), 65);
        assert_eq!(neighbor(&e, 64, false, 0, &carry, &[]), 62);
        // B wraps into the next octave
        let b = pitch("B", 4, None);
        assert_eq!(neighbor(&b, 71, true, 0, &carry, &[]), 72);
    }

    #[test]
    fn accidental_mark_alters_neighbour() {
        let carry = MeasureCarry::new();
        let e = pitch("E", 4, None);
        let marks = [AccidentalMark {
            value: "sharp".into(),
            placement: None,
        }];
        assert_eq!(neighbor(&e, 64, true, 0, &carry, &marks), 66);
        let below = [AccidentalMark {
            value: "sharp".into(),
            placement: Some("below".into()),
        }];
        assert_eq!(neighbor(&e, 64, false, 0, &carry, &below), 63);
    }

    #[test]
    fn out_of_reach_neighbour_falls_back_to_whole_step() {
        let carry = MeasureCarry::new();
        let marks = [AccidentalMark {
            value: "double-sharp".into(),
            placement: None,
        }];
        // E up to F double-sharp is three semitones
        assert_eq!(neighbor(&pitch("E", 4, None), 64, true, 0, &carry, &marks), 66);
    }

    #[test]
    fn drum_resolution_order() {
        let part = Part {
            instruments: vec![
                ScoreInstrument {
                    id: "P1-I1".into(),
                    name: "Crash Cymbal".into(),
                    ..Default::default()
                },
                ScoreInstrument {
                    id: "P1-I2".into(),
                    name: "Snare".into(),
                    midi_unpitched: Some(39),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let mut note = Note {
            instrument: Some("P1-I2".into()),
            unpitched: Some(Unpitched {
                display_step: Some("F".into()),
                display_octave: Some(4),
            }),
            ..Default::default()
        };
        assert_eq!(resolve_drum(&note, &part), 38);

        note.instrument = Some("P1-I1".into());
        assert_eq!(resolve_drum(&note, &part), 65);

        note.unpitched = Some(Unpitched {
            display_step: None,
            display_octave: None,
        });
        assert_eq!(resolve_drum(&note, &part), 49);

        note.instrument = None;
        assert_eq!(resolve_drum(&note, &part), 38);

        let bare = Part::default();
        assert_eq!(resolve_drum(&note, &bare), 38);
        note.pitch = Some(pitch("A", 2, None));
        assert_eq!(resolve_drum(&note, &bare), 45);
    }
}
