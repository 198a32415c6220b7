//! Tempo math shared by the step clock, the recorder and the count-in.
//!
//! All times are audio-clock seconds (`f64`).  BPM is the only source of time:
//! the quantize resolution never changes the duration of a step.

use serde::{Deserialize, Serialize};

pub const MIN_BPM: f64 = 30.0;
pub const MAX_BPM: f64 = 300.0;

/// 32nd notes per quarter-note beat.
pub const STEPS_PER_BEAT: usize = 8;

pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() { bpm.clamp(MIN_BPM, MAX_BPM) } else { MIN_BPM }
}

pub fn seconds_per_beat(bpm: f64) -> f64 {
    60.0 / bpm
}

/// Duration of one step (a 32nd note).
pub fn thirty_second(bpm: f64) -> f64 {
    60.0 / bpm / 8.0
}

pub fn sixteenth(bpm: f64) -> f64 {
    60.0 / bpm / 4.0
}

pub fn loop_duration(bpm: f64, beats_per_bar: usize, bars: usize) -> f64 {
    seconds_per_beat(bpm) * beats_per_bar as f64 * bars as f64
}

// ── Swing ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Swing {
    #[default]
    Straight,
    Light,
    Heavy,
}

impl Swing {
    pub const ALL: [Swing; 3] = [Swing::Straight, Swing::Light, Swing::Heavy];

    pub fn percent(self) -> u8 {
        match self {
            Self::Straight => 50,
            Self::Light    => 60,
            Self::Heavy    => 70,
        }
    }

    /// Snap an arbitrary percentage to the nearest supported swing amount.
    pub fn from_percent(pct: f64) -> Self {
        if !pct.is_finite() {
            return Self::Straight;
        }
        Self::ALL
            .into_iter()
            .min_by(|a, b| {
                let da = (a.percent() as f64 - pct).abs();
                let db = (b.percent() as f64 - pct).abs();
                da.total_cmp(&db)
            })
            .unwrap_or_default()
    }

    pub fn next(self) -> Self {
        match self {
            Self::Straight => Self::Light,
            Self::Light    => Self::Heavy,
            Self::Heavy    => Self::Straight,
        }
    }
}

impl From<Swing> for u8 {
    fn from(s: Swing) -> u8 { s.percent() }
}

impl From<u8> for Swing {
    fn from(pct: u8) -> Self { Self::from_percent(pct as f64) }
}

/// Offset applied to odd 16ths: `((pct/100) - 0.5) * 2 * sixteenth`.
pub fn swing_delay(bpm: f64, swing: Swing) -> f64 {
    (swing.percent() as f64 / 100.0 - 0.5) * 2.0 * sixteenth(bpm)
}

/// Time from `step` to `step + 1`.
///
/// Even steps are the first half of a 16th and advance by one 32nd.  Odd steps
/// cross into the next 16th: entering an odd (swung) 16th adds the swing delay,
/// leaving one subtracts it, so even 16ths stay on the straight grid.
pub fn step_interval(step: usize, bpm: f64, swing: Swing) -> f64 {
    let base = thirty_second(bpm);
    if step % 2 == 0 {
        return base;
    }
    let entering = (step + 1) / 2;
    let delay = swing_delay(bpm, swing);
    if entering % 2 == 1 { base + delay } else { base - delay }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn durations_at_70_bpm() {
        assert!((seconds_per_beat(70.0) - 0.857_142_857).abs() < 1e-6);
        assert!((thirty_second(70.0) - 0.107_142_857).abs() < 1e-6);
        assert!((sixteenth(70.0) - 0.214_285_714).abs() < 1e-6);
        assert!((loop_duration(70.0, 4, 4) - 13.714_285_714).abs() < 1e-6);
    }

    #[test]
    fn straight_swing_is_uniform() {
        assert_eq!(swing_delay(120.0, Swing::Straight), 0.0);
        let d = thirty_second(120.0);
        for step in 0..128 {
            assert!((step_interval(step, 120.0, Swing::Straight) - d).abs() < EPS);
        }
    }

    #[test]
    fn swung_intervals_stay_positive_and_sum_to_the_loop() {
        for swing in Swing::ALL {
            let total: f64 = (0..128).map(|s| step_interval(s, 70.0, swing)).sum();
            assert!((total - loop_duration(70.0, 4, 4)).abs() < 1e-9);
            for s in 0..128 {
                assert!(step_interval(s, 70.0, swing) > 0.0);
            }
        }
    }

    #[test]
    fn swing_only_moves_odd_sixteenths() {
        let bpm = 100.0;
        let mut t = 0.0;
        for step in 0..32 {
            if step % 4 == 0 {
                // Even 16ths land on the straight grid.
                assert!((t - step as f64 * thirty_second(bpm)).abs() < EPS);
            }
            if step % 4 == 2 {
                let straight = step as f64 * thirty_second(bpm);
                assert!((t - straight - swing_delay(bpm, Swing::Heavy)).abs() < EPS);
            }
            t += step_interval(step, bpm, Swing::Heavy);
        }
    }

    #[test]
    fn swing_snaps_to_supported_values() {
        assert_eq!(Swing::from_percent(50.0), Swing::Straight);
        assert_eq!(Swing::from_percent(63.0), Swing::Light);
        assert_eq!(Swing::from_percent(99.0), Swing::Heavy);
        assert_eq!(Swing::from_percent(f64::NAN), Swing::Straight);
    }

    #[test]
    fn bpm_is_clamped() {
        assert_eq!(clamp_bpm(5.0), MIN_BPM);
        assert_eq!(clamp_bpm(1000.0), MAX_BPM);
        assert_eq!(clamp_bpm(f64::INFINITY), MIN_BPM);
        assert_eq!(clamp_bpm(128.0), 128.0);
    }
}
