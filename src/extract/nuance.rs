//! Performance nuance: which effects are on, articulation and metric accents.

use crate::model::{Articulation, Note, TimeSignature};
use crate::options::{AccentProfile, ExportOptions, PlaybackMode};

/// Default separation applied to plain notes.
pub(crate) const DETACHE_RATIO: f64 = 0.93;

/// Effects enabled for one extraction, chosen once from the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Nuance {
    pub articulation: bool,
    pub metric_accent: bool,
    pub graces: bool,
    pub ornaments: bool,
    pub fermata: bool,
    pub ties: bool,
    pub legato: bool,
    pub wedges: bool,
    pub dynamics: bool,
    pub pedal: bool,
}

impl Nuance {
    pub(crate) fn for_options(options: &ExportOptions) -> Self {
        let on = options.mode == PlaybackMode::Midi;
        Self {
            articulation: on,
            metric_accent: on && options.metric_accent,
            graces: on,
            ornaments: on,
            fermata: on,
            ties: on,
            legato: on,
            wedges: on,
            dynamics: on,
            pedal: on,
        }
    }
}

/// What a note's articulations do to it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct ArticulationEffect {
    pub velocity_bonus: i32,
    /// Sounding/notated length ratio, when an articulation sets one
    pub ratio: Option<f64>,
    /// Tenuto: held full length, and counts as legato
    pub sustained: bool,
    pub caesura: bool,
    /// Any articulation at all (suppresses the default détaché)
    pub any: bool,
}

pub(crate) fn articulation_effect(note: &Note) -> ArticulationEffect {
    let has = |a: Articulation| note.articulations.contains(&a);
    let mut effect = ArticulationEffect {
        any: !note.articulations.is_empty(),
        caesura: has(Articulation::Caesura),
        ..Default::default()
    };

    if has(Articulation::StrongAccent) {
        effect.velocity_bonus = 24;
    } else if has(Articulation::Accent) {
        effect.velocity_bonus = 14;
    }

    if has(Articulation::Tenuto) {
        effect.ratio = Some(1.0);
        effect.sustained = true;
    } else if has(Articulation::Staccatissimo) {
        effect.ratio = Some(0.35);
    } else if has(Articulation::Staccato) {
        effect.ratio = Some(0.55);
    }
    effect
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Beat {
    Strong,
    Medium,
    Weak,
}

use Beat::{Medium as M, Strong as S, Weak as W};

/// Beat weights by meter; anything else accents only the downbeat.
fn pattern(time: TimeSignature) -> Option<&'static [Beat]> {
    match (time.beats, time.beat_type) {
        (4, 4) => Some(&[S, W, M, W]),
        (6, 8) => Some(&[S, W, W, M, W, W]),
        (3, _) => Some(&[S, W, W]),
        (5, _) => Some(&[S, W, W, M, W]),
        _ => None,
    }
}

/// Velocity bonus for a note starting `offset_div` into the measure.
pub(crate) fn metric_accent(
    offset_div: u64,
    divisions: u64,
    time: TimeSignature,
    profile: AccentProfile,
) -> i32 {
    if divisions == 0 || time.beat_type <= 0 {
        return 0;
    }
    let beat_quarters = 4.0 / f64::from(time.beat_type);
    let position = offset_div as f64 / divisions as f64 / beat_quarters;
    if (position - position.round()).abs() > 1e-6 {
        return 0;
    }
    let beat = position.round() as usize;
    let weight = match pattern(time) {
        Some(p) => p.get(beat).copied().unwrap_or(W),
        None if beat == 0 => S,
        None => W,
    };
    let (strong, medium) = profile.deltas();
    match weight {
        Beat::Strong => strong,
        Beat::Medium => medium,
        Beat::Weak => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(beats: i32, beat_type: i32) -> TimeSignature {
        TimeSignature { beats, beat_type }
    }

    #[test]
    fn playback_mode_disables_everything() {
        let opts = ExportOptions {
            mode: PlaybackMode::Playback,
            metric_accent: true,
            ..Default::default()
        };
        let n = Nuance::for_options(&opts);
        assert!(!n.articulation && !n.metric_accent && !n.graces && !n.ties && !n.wedges);
    }

    #[test]
    fn metric_accent_needs_its_option() {
        let n = Nuance::for_options(&ExportOptions::default());
        assert!(n.articulation && !n.metric_accent);
    }

    #[test]
    fn accents_and_shortening() {
        let note = Note {
            articulations: vec![Articulation::Accent, Articulation::Staccato, Articulation::Staccatissimo],
            ..Default::default()
        };
        let e = articulation_effect(&note);
        assert_eq!(e.velocity_bonus, 14);
        assert_eq!(e.ratio, Some(0.35));
        assert!(e.any && !e.sustained);

        let note = Note {
            articulations: vec![Articulation::Accent, Articulation::StrongAccent, Articulation::Tenuto],
            ..Default::default()
        };
        let e = articulation_effect(&note);
        assert_eq!(e.velocity_bonus, 24);
        assert_eq!(e.ratio, Some(1.0));
        assert!(e.sustained);
    }

    #[test]
    fn common_time_pattern() {
        let p = AccentProfile::Balanced;
        assert_eq!(metric_accent(0, 4, ts(4, 4), p), 8);
        assert_eq!(metric_accent(4, 4, ts(4, 4), p), 0);
        assert_eq!(metric_accent(8, 4, ts(4, 4), p), 4);
        assert_eq!(metric_accent(2, 4, ts(4, 4), p), 0);
    }

    #[test]
    fn compound_and_odd_meters() {
        let p = AccentProfile::Strong;
        // 6/8 at 2 divisions per quarter: eighth = 1 division
        assert_eq!(metric_accent(3, 2, ts(6, 8), p), 6);
        assert_eq!(metric_accent(0, 2, ts(6, 8), p), 12);
        assert_eq!(metric_accent(3, 1, ts(5, 4), p), 6);
        assert_eq!(metric_accent(2, 1, ts(3, 4), p), 0);
        // unknown meter: downbeat only
        assert_eq!(metric_accent(0, 1, ts(7, 4), AccentProfile::Subtle), 4);
        assert_eq!(metric_accent(3, 1, ts(7, 4), AccentProfile::Subtle), 0);
    }
}
