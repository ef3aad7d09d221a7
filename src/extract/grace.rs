//! Grace-note timing.

use crate::options::GraceTimingMode;

/// A grace note waiting for its principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingGrace {
    pub pitch: i32,
    pub slash: bool,
    pub velocity: u8,
}

/// Where the graces and the principal land, in ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GracePlacement {
    /// (start, duration) per grace, in input order
    pub graces: Vec<(u64, u64)>,
    pub principal_start: u64,
    pub principal_dur: u64,
}

/// Share out time between `graces` and the principal note at
/// `start`/`dur`.
///
/// Outside `ClassicalEqual` each grace weighs 1 (slashed) or 2 (unslashed)
/// sixteenths of a quarter, and all of them together take at most half
/// the principal.
pub(crate) fn place_graces(
    graces: &[PendingGrace],
    start: u64,
    dur: u64,
    ticks_per_quarter: u64,
    mode: GraceTimingMode,
) -> GracePlacement {
    if mode == GraceTimingMode::ClassicalEqual {
        let parts = graces.len() as u64 + 1;
        let share = (dur / parts).max(1);
        let taken = share * graces.len() as u64;
        return GracePlacement {
            graces: (0..graces.len() as u64).map(|i| (start + i * share, share)).collect(),
            principal_start: start + taken,
            principal_dur: dur.saturating_sub(taken).max(1),
        };
    }

    let unit = (ticks_per_quarter / 16).max(1);
    let mut lengths: Vec<u64> = graces
        .iter()
        .map(|g| if g.slash { unit } else { 2 * unit })
        .collect();
    let wanted: u64 = lengths.iter().sum();
    let cap = (dur / 2).max(1);
    if wanted > cap {
        for len in &mut lengths {
            *len = (*len * cap / wanted).max(1);
        }
    }
    let total: u64 = lengths.iter().sum();

    let (first, principal_start, principal_dur) = match mode {
        GraceTimingMode::OnBeat => (start, start + total, dur.saturating_sub(total).max(1)),
        _ => (start.saturating_sub(total), start, dur),
    };

    let mut at = first;
    let placed = lengths
        .into_iter()
        .map(|len| {
            let slot = (at, len);
            at += len;
            slot
        })
        .collect();

    GracePlacement {
        graces: placed,
        principal_start,
        principal_dur,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grace(slash: bool) -> PendingGrace {
        PendingGrace {
            pitch: 62,
            slash,
            velocity: 80,
        }
    }

    #[test]
    fn before_beat_steals_from_previous_beat() {
        let p = place_graces(&[grace(true), grace(false)], 960, 480, 480, GraceTimingMode::BeforeBeat);
        assert_eq!(p.graces, vec![(870, 30), (900, 60)]);
        assert_eq!((p.principal_start, p.principal_dur), (960, 480));
    }

    #[test]
    fn on_beat_delays_principal() {
        let p = place_graces(&[grace(false)], 960, 480, 480, GraceTimingMode::OnBeat);
        assert_eq!(p.graces, vec![(960, 60)]);
        assert_eq!((p.principal_start, p.principal_dur), (1020, 420));
    }

    #[test]
    fn classical_equal_ignores_slash() {
        let p = place_graces(&[grace(true), grace(false)], 0, 480, 480, GraceTimingMode::ClassicalEqual);
        assert_eq!(p.graces, vec![(0, 160), (160, 160)]);
        assert_eq!((p.principal_start, p.principal_dur), (320, 160));
    }

    #[test]
    fn graces_never_exceed_half_the_principal() {
        let many = vec![grace(false); 8];
        let p = place_graces(&many, 480, 120, 480, GraceTimingMode::OnBeat);
        let total: u64 = p.graces.iter().map(|g| g.1).sum();
        assert!(total <= 60, "{total}");
        assert_eq!(p.principal_start, 480 + total);
    }

    #[test]
    fn before_beat_at_time_zero_clamps() {
        let p = place_graces(&[grace(false)], 0, 480, 480, GraceTimingMode::BeforeBeat);
        assert_eq!(p.graces, vec![(0, 60)]);
        assert_eq!(p.principal_start, 0);
    }
}
