//! Quantization, controller velocity scaling and voice allocation.
//!
//! Takes decoded notes to a grid the notation side can express, folds
//! CC7/CC11 levels into note velocities, and splits overlapping material
//! into monophonic voices (chords stay together in one voice).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Diagnostic, DiagnosticCode};
use crate::smf::{ControllerEvent, RawNoteEvent};

// ═══════════════════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════════════════

/// Smallest note value imported boundaries are snapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuantizeGrid {
    #[serde(rename = "1/8")]
    Eighth,
    #[default]
    #[serde(rename = "1/16")]
    Sixteenth,
    #[serde(rename = "1/32")]
    ThirtySecond,
}

impl QuantizeGrid {
    /// Grid cells per quarter note.
    pub fn subdivision(self) -> u32 {
        match self {
            QuantizeGrid::Eighth => 2,
            QuantizeGrid::Sixteenth => 4,
            QuantizeGrid::ThirtySecond => 8,
        }
    }

    /// Grid step in ticks for a file resolution.
    pub fn step(self, ticks_per_quarter: u16) -> u64 {
        let step = (f64::from(ticks_per_quarter) / f64::from(self.subdivision())).round();
        (step as u64).max(1)
    }
}

/// A note snapped to the grid.  `end_tick > start_tick` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedNote {
    pub track_index: usize,
    pub channel: u8,
    pub pitch: u8,
    pub start_tick: u64,
    pub end_tick: u64,
    pub velocity: u8,
}

/// Notes that start together and share a voice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceCluster {
    /// 1-based voice number
    pub voice: u32,
    pub start_tick: u64,
    /// Latest end among the member notes
    pub end_tick: u64,
    pub notes: Vec<QuantizedNote>,
}

/// Voice count above which the density warning fires.
const MAX_COMFORTABLE_VOICES: usize = 8;

// ═══════════════════════════════════════════════════════════════════════
// Quantization
// ═══════════════════════════════════════════════════════════════════════

/// Snap note boundaries to the nearest grid step.
pub fn quantize(
    notes: &[RawNoteEvent],
    ticks_per_quarter: u16,
    grid: QuantizeGrid,
) -> (Vec<QuantizedNote>, Vec<Diagnostic>) {
    let step = grid.step(ticks_per_quarter);
    let mut warnings = Vec::new();

    let snap = |tick: u64| ((tick + step / 2) / step) * step;

    let quantized = notes
        .iter()
        .map(|n| {
            let start_tick = snap(n.start_tick);
            let mut end_tick = snap(n.end_tick);
            if end_tick <= start_tick {
                end_tick = start_tick + step;
                warnings.push(Diagnostic::warning(
                    DiagnosticCode::QuantizeClamped,
                    format!(
                        "track {} channel {} pitch {} at tick {}: length collapsed, clamped to one grid step",
                        n.track_index, n.channel, n.pitch, n.start_tick
                    ),
                ));
            }
            QuantizedNote {
                track_index: n.track_index,
                channel: n.channel,
                pitch: n.pitch,
                start_tick,
                end_tick,
                velocity: n.velocity,
            }
        })
        .collect();

    (quantized, warnings)
}

// ═══════════════════════════════════════════════════════════════════════
// Controller velocity scaling
// ═══════════════════════════════════════════════════════════════════════

/// Scale velocities by the CC7 (volume) and CC11 (expression) levels in
/// effect at each note's start on the same track and channel.
pub fn apply_controller_velocity_scale(
    notes: Vec<RawNoteEvent>,
    controllers: &[ControllerEvent],
) -> Vec<RawNoteEvent> {
    if controllers.is_empty() {
        return notes;
    }

    // (track, channel, controller) → [(tick, value)] sorted by tick
    let mut curves: HashMap<(usize, u8, u8), Vec<(u64, u8)>> = HashMap::new();
    for c in controllers {
        curves
            .entry((c.track_index, c.channel, c.controller))
            .or_default()
            .push((c.tick, c.value));
    }
    for curve in curves.values_mut() {
        curve.sort_by_key(|&(tick, _)| tick);
    }

    let level_at = |track: usize, channel: u8, controller: u8, tick: u64| -> f64 {
        let value = curves
            .get(&(track, channel, controller))
            .and_then(|curve| {
                let idx = curve.partition_point(|&(t, _)| t <= tick);
                idx.checked_sub(1).map(|i| curve[i].1)
            })
            .unwrap_or(127);
        f64::from(value) / 127.0
    };

    notes
        .into_iter()
        .map(|mut n| {
            let volume = level_at(n.track_index, n.channel, 7, n.start_tick);
            let expression = level_at(n.track_index, n.channel, 11, n.start_tick);
            let scaled = (f64::from(n.velocity) * volume * expression).floor();
            n.velocity = scaled.clamp(1.0, 127.0) as u8;
            n
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Voice allocation
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct VoiceState {
    last_end: u64,
    last_pitch: u8,
}

/// Partition notes into voices, one cluster per distinct start tick.
///
/// Clusters are visited in start order.  Each goes to the free voice (one
/// whose last cluster has ended) with the smallest gap, then the smallest
/// pitch jump from its representative (upper-median) pitch; when no voice
/// is free a new one is opened.
pub fn allocate_auto_voices(notes: Vec<QuantizedNote>) -> (Vec<VoiceCluster>, Vec<Diagnostic>) {
    let mut by_start: BTreeMap<u64, Vec<QuantizedNote>> = BTreeMap::new();
    for n in notes {
        by_start.entry(n.start_tick).or_default().push(n);
    }

    let mut voices: Vec<VoiceState> = Vec::new();
    let mut clusters = Vec::with_capacity(by_start.len());

    for (start_tick, mut members) in by_start {
        members.sort_by_key(|n| (n.pitch, n.end_tick));
        let end_tick = members.iter().map(|n| n.end_tick).max().unwrap_or(start_tick);
        let pitch = members[members.len() / 2].pitch;

        let chosen = voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.last_end <= start_tick)
            .min_by_key(|(_, v)| (start_tick - v.last_end, v.last_pitch.abs_diff(pitch)))
            .map(|(i, _)| i);

        let index = match chosen {
            Some(i) => i,
            None => {
                voices.push(VoiceState {
                    last_end: end_tick,
                    last_pitch: pitch,
                });
                voices.len() - 1
            }
        };
        voices[index] = VoiceState {
            last_end: end_tick,
            last_pitch: pitch,
        };

        clusters.push(VoiceCluster {
            voice: index as u32 + 1,
            start_tick,
            end_tick,
            notes: members,
        });
    }

    let mut warnings = Vec::new();
    if voices.len() > 1 {
        warnings.push(Diagnostic::warning(
            DiagnosticCode::PolyphonyVoiceAssigned,
            format!("overlapping notes split into {} voices", voices.len()),
        ));
    }
    if voices.len() > MAX_COMFORTABLE_VOICES {
        warnings.push(Diagnostic::warning(
            DiagnosticCode::PolyphonyVoiceOverflow,
            format!(
                "{} voices needed, more than {MAX_COMFORTABLE_VOICES} will be hard to read",
                voices.len()
            ),
        ));
    }

    (clusters, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pitch: u8, start: u64, end: u64) -> RawNoteEvent {
        RawNoteEvent {
            track_index: 0,
            channel: 1,
            pitch,
            start_tick: start,
            end_tick: end,
            velocity: 100,
        }
    }

    fn q(pitch: u8, start: u64, end: u64) -> QuantizedNote {
        QuantizedNote {
            track_index: 0,
            channel: 1,
            pitch,
            start_tick: start,
            end_tick: end,
            velocity: 100,
        }
    }

    #[test]
    fn grid_steps() {
        assert_eq!(QuantizeGrid::Sixteenth.step(480), 120);
        assert_eq!(QuantizeGrid::Eighth.step(480), 240);
        assert_eq!(QuantizeGrid::ThirtySecond.step(96), 12);
        assert_eq!(QuantizeGrid::ThirtySecond.step(3), 1);
    }

    #[test]
    fn snaps_to_nearest_step() {
        let (notes, warnings) = quantize(&[raw(60, 59, 470)], 480, QuantizeGrid::Sixteenth);
        assert!(warnings.is_empty());
        assert_eq!((notes[0].start_tick, notes[0].end_tick), (0, 480));
    }

    #[test]
    fn half_step_rounds_up() {
        let (notes, _) = quantize(&[raw(60, 60, 300)], 480, QuantizeGrid::Sixteenth);
        assert_eq!((notes[0].start_tick, notes[0].end_tick), (120, 360));
    }

    #[test]
    fn collapsed_note_is_clamped_with_warning() {
        let (notes, warnings) = quantize(&[raw(60, 130, 170)], 480, QuantizeGrid::Sixteenth);
        assert_eq!((notes[0].start_tick, notes[0].end_tick), (120, 240));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, DiagnosticCode::QuantizeClamped);
    }

    #[test]
    fn quantized_boundaries_are_grid_multiples() {
        let input: Vec<RawNoteEvent> = (0..50u64)
            .map(|i| raw(60, i * 37 + 5, i * 37 + 5 + (i % 7) * 11))
            .collect();
        for grid in [QuantizeGrid::Eighth, QuantizeGrid::Sixteenth, QuantizeGrid::ThirtySecond] {
            let step = grid.step(480);
            let (notes, _) = quantize(&input, 480, grid);
            for n in notes {
                assert_eq!(n.start_tick % step, 0);
                assert_eq!(n.end_tick % step, 0);
                assert!(n.end_tick > n.start_tick);
            }
        }
    }

    #[test]
    fn controller_scaling_uses_latest_levels() {
        let controllers = [
            ControllerEvent { track_index: 0, channel: 1, tick: 0, controller: 7, value: 127 },
            ControllerEvent { track_index: 0, channel: 1, tick: 100, controller: 7, value: 64 },
            ControllerEvent { track_index: 0, channel: 1, tick: 100, controller: 11, value: 127 },
            ControllerEvent { track_index: 0, channel: 2, tick: 0, controller: 7, value: 0 },
        ];
        let notes = apply_controller_velocity_scale(
            vec![raw(60, 0, 50), raw(62, 100, 200), raw(64, 99, 120)],
            &controllers,
        );
        assert_eq!(notes[0].velocity, 100);
        // 100 * 64/127 = 50.39
        assert_eq!(notes[1].velocity, 50);
        assert_eq!(notes[2].velocity, 100);
    }

    #[test]
    fn silent_controller_floors_at_one() {
        let controllers = [ControllerEvent { track_index: 0, channel: 1, tick: 0, controller: 11, value: 0 }];
        let notes = apply_controller_velocity_scale(vec![raw(60, 0, 50)], &controllers);
        assert_eq!(notes[0].velocity, 1);
    }

    #[test]
    fn monophonic_line_stays_in_one_voice() {
        let (clusters, warnings) =
            allocate_auto_voices(vec![q(60, 0, 480), q(62, 480, 960), q(64, 960, 1440)]);
        assert!(clusters.iter().all(|c| c.voice == 1));
        assert!(warnings.is_empty());
    }

    #[test]
    fn chord_members_share_a_cluster() {
        let (clusters, _) = allocate_auto_voices(vec![q(60, 0, 480), q(64, 0, 960), q(67, 0, 480)]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].end_tick, 960);
        assert_eq!(clusters[0].notes.len(), 3);
    }

    #[test]
    fn overlap_opens_second_voice() {
        let (clusters, warnings) =
            allocate_auto_voices(vec![q(72, 0, 960), q(48, 480, 960), q(74, 960, 1440), q(50, 960, 1440)]);
        let voices: Vec<(u8, u32)> = clusters
            .iter()
            .flat_map(|c| c.notes.iter().map(move |n| (n.pitch, c.voice)))
            .collect();
        assert_eq!(voices, vec![(72, 1), (48, 2), (50, 1), (74, 1)]);
        assert_eq!(warnings[0].code, DiagnosticCode::PolyphonyVoiceAssigned);
    }

    #[test]
    fn free_voice_nearest_in_pitch_wins() {
        let (clusters, _) = allocate_auto_voices(vec![
            q(72, 0, 480),
            q(48, 0, 480),
            q(50, 0, 480),
            q(60, 240, 480),
            q(47, 480, 960),
        ]);
        // voice 1 last sounded 50 (median of 48/50/72), voice 2 last sounded 60

        let last = clusters.last().unwrap();
        assert_eq!(last.voice, 1);
    }

    #[test]
    fn simultaneous_clusters_never_share_a_voice() {
        let notes: Vec<QuantizedNote> = (0..20u64)
            .map(|i| q(40 + (i * 7 % 30) as u8, i * 120, i * 120 + 120 * (1 + i % 5)))
            .collect();
        let (clusters, _) = allocate_auto_voices(notes);
        for a in &clusters {
            for b in &clusters {
                if a.start_tick < b.start_tick && b.start_tick < a.end_tick {
                    assert_ne!(a.voice, b.voice, "{a:?} overlaps {b:?}");
                }
            }
        }
    }

    #[test]
    fn more_than_eight_voices_overflows() {
        let notes: Vec<QuantizedNote> = (0..9u64).map(|i| q(60 + i as u8, i, 1000)).collect();
        let (_, warnings) = allocate_auto_voices(notes);
        let codes: Vec<DiagnosticCode> = warnings.iter().map(|w| w.code).collect();
        assert_eq!(
            codes,
            vec![DiagnosticCode::PolyphonyVoiceAssigned, DiagnosticCode::PolyphonyVoiceOverflow]
        );
    }
}
