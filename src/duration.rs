//! Duration → notation resolver.
//!
//! Maps a length in score divisions to notehead types and dots.  A length
//! that no single notehead can express is decomposed into the shortest
//! chain of tied chunks.  The table order and the descending iteration
//! order decide which of several equally short chains is returned, so both
//! are fixed.

use serde::Serialize;

/// One notated duration: notehead type plus dots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationNotation {
    /// MusicXML `<type>` value: "whole", "half", … "64th"
    pub note_type: &'static str,
    /// Number of augmentation dots (0–2)
    pub dots: u8,
    /// Length in quarter notes
    pub quarters: f64,
    /// Length in score divisions (for the divisions it was resolved against)
    pub divisions: f64,
}

const EPSILON: f64 = 1e-6;

/// (type, dots, quarter-note length), longest first.
const DURATION_TABLE: [(&str, u8, f64); 21] = [
    ("whole", 0, 4.0),
    ("whole", 1, 6.0),
    ("whole", 2, 7.0),
    ("half", 0, 2.0),
    ("half", 1, 3.0),
    ("half", 2, 3.5),
    ("quarter", 0, 1.0),
    ("quarter", 1, 1.5),
    ("quarter", 2, 1.75),
    ("eighth", 0, 0.5),
    ("eighth", 1, 0.75),
    ("eighth", 2, 0.875),
    ("16th", 0, 0.25),
    ("16th", 1, 0.375),
    ("16th", 2, 0.4375),
    ("32nd", 0, 0.125),
    ("32nd", 1, 0.1875),
    ("32nd", 2, 0.21875),
    ("64th", 0, 0.0625),
    ("64th", 1, 0.09375),
    ("64th", 2, 0.109375),
];

fn entry(index: usize, divisions: f64) -> DurationNotation {
    let (note_type, dots, quarters) = DURATION_TABLE[index];
    DurationNotation {
        note_type,
        dots,
        quarters,
        divisions: quarters * divisions,
    }
}

/// Look up a single notehead that is exactly `duration_div` long.
pub fn resolve_exact(duration_div: f64, divisions: u32) -> Option<DurationNotation> {
    if divisions == 0 {
        return None;
    }
    let divisions = f64::from(divisions);
    let quarters = duration_div / divisions;
    DURATION_TABLE
        .iter()
        .position(|&(_, _, q)| (q - quarters).abs() < EPSILON)
        .map(|i| entry(i, divisions))
}

/// Decompose `duration_div` into the fewest tied chunks.
///
/// Returns an empty list for non-integer lengths, for zero, and for
/// lengths the table cannot reach at this resolution.
pub fn resolve_chain(duration_div: f64, divisions: u32) -> Vec<DurationNotation> {
    if let Some(exact) = resolve_exact(duration_div, divisions) {
        return vec![exact];
    }
    let rounded = duration_div.round();
    if divisions == 0 || rounded < 1.0 || (duration_div - rounded).abs() > EPSILON {
        return Vec::new();
    }
    let target = rounded as usize;
    let div = f64::from(divisions);

    // Integer-valued entries, longest first; the stable sort keeps table
    // order among equal lengths.
    let mut candidates: Vec<(usize, usize)> = DURATION_TABLE
        .iter()
        .enumerate()
        .filter_map(|(i, &(_, _, q))| {
            let len = q * div;
            let whole = len.round();
            ((len - whole).abs() < EPSILON && whole >= 1.0).then_some((i, whole as usize))
        })
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    // best[s] = fewest chunks summing to s, choice[s] = first chunk taken
    let mut best: Vec<Option<usize>> = vec![None; target + 1];
    let mut choice: Vec<usize> = vec![0; target + 1];
    best[0] = Some(0);
    for sum in 1..=target {
        for (slot, &(_, len)) in candidates.iter().enumerate() {
            if len > sum {
                continue;
            }
            if let Some(prev) = best[sum - len] {
                if best[sum].map_or(true, |b| prev + 1 < b) {
                    best[sum] = Some(prev + 1);
                    choice[sum] = slot;
                }
            }
        }
    }

    if best[target].is_none() {
        return Vec::new();
    }
    let mut chain = Vec::new();
    let mut remaining = target;
    while remaining > 0 {
        let (table_index, len) = candidates[choice[remaining]];
        chain.push(entry(table_index, div));
        remaining -= len;
    }
    chain
}
