//! Ornament expansion into sounding sub-notes.

use crate::model::Ornament;

/// One sub-note of an ornament: (pitch, start tick, duration).
pub(crate) type SubNote = (i32, u64, u64);

/// Expand `ornament` over `start`/`dur`.
///
/// Trills alternate principal and upper neighbour in eighth-of-a-quarter
/// segments (between 2 and 16 of them).  Turns split the note in four;
/// mordents use two short notes of at most an eighth of a quarter.
pub(crate) fn expand(
    ornament: Ornament,
    principal: i32,
    upper: i32,
    lower: i32,
    start: u64,
    dur: u64,
    ticks_per_quarter: u64,
) -> Vec<SubNote> {
    match ornament {
        Ornament::TrillMark | Ornament::Shake => {
            let segment = (ticks_per_quarter / 8).max(1);
            let count = (dur / segment).clamp(2, 16);
            let pitches = (0..count).map(|i| if i % 2 == 0 { principal } else { upper });
            split_evenly(pitches.collect(), start, dur)
        }
        Ornament::Turn => split_evenly(vec![upper, principal, lower, principal], start, dur),
        Ornament::InvertedTurn => split_evenly(vec![lower, principal, upper, principal], start, dur),
        Ornament::Mordent => short_then_rest([principal, lower, principal], start, dur, ticks_per_quarter),
        Ornament::InvertedMordent => {
            short_then_rest([principal, upper, principal], start, dur, ticks_per_quarter)
        }
    }
}

/// Equal slices; the last one takes the remainder.
fn split_evenly(pitches: Vec<i32>, start: u64, dur: u64) -> Vec<SubNote> {
    let count = pitches.len() as u64;
    let piece = dur / count;
    if piece == 0 {
        return vec![(pitches[0], start, dur.max(1))];
    }
    pitches
        .into_iter()
        .enumerate()
        .map(|(i, pitch)| {
            let i = i as u64;
            let len = if i + 1 == count { dur - piece * i } else { piece };
            (pitch, start + piece * i, len)
        })
        .collect()
}

fn short_then_rest(pitches: [i32; 3], start: u64, dur: u64, ticks_per_quarter: u64) -> Vec<SubNote> {
    let short = (ticks_per_quarter / 8).min(dur / 4);
    if short == 0 {
        return vec![(pitches[0], start, dur.max(1))];
    }
    vec![
        (pitches[0], start, short),
        (pitches[1], start + short, short),
        (pitches[2], start + 2 * short, dur - 2 * short),
    ]
}
