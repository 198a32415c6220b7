use serde::{Deserialize, Serialize};

use crate::clock::{self, STEPS_PER_BEAT};
use crate::error::SliceError;

pub const NUM_SLICES: usize = 16;

// ── Slices ────────────────────────────────────────────────────────────────────

/// One triggerable region of the loaded sample, in seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Slice {
    pub start: f64,
    pub end: f64,
}

impl Slice {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Exactly sixteen contiguous, non-overlapping slices (`end[i] == start[i+1]`).
#[derive(Clone, Debug, PartialEq)]
pub struct Slices([Slice; NUM_SLICES]);

impl Slices {
    /// Divide `duration` seconds into sixteen equal regions.
    pub fn even(duration: f64) -> Self {
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        let width = duration / NUM_SLICES as f64;
        Self(std::array::from_fn(|i| Slice {
            start: width * i as f64,
            end: if i == NUM_SLICES - 1 { duration } else { width * (i + 1) as f64 },
        }))
    }

    pub fn get(&self, index: usize) -> Option<Slice> {
        self.0.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slice> {
        self.0.iter()
    }

    /// First slice reaching past `duration` seconds, if any.
    pub fn first_past(&self, duration: f64) -> Option<usize> {
        self.0.iter().position(|s| s.end > duration + 1e-9)
    }

    /// Move the boundary between slice `index` and `index + 1`, keeping both
    /// slices non-negative.  Out-of-range indices are ignored.
    pub fn nudge_boundary(&mut self, index: usize, delta: f64) {
        if index + 1 >= NUM_SLICES || !delta.is_finite() {
            return;
        }
        let lo = self.0[index].start;
        let hi = self.0[index + 1].end;
        let b = (self.0[index].end + delta).clamp(lo, hi);
        self.0[index].end = b;
        self.0[index + 1].start = b;
    }
}

impl TryFrom<Vec<Slice>> for Slices {
    type Error = SliceError;

    fn try_from(v: Vec<Slice>) -> Result<Self, Self::Error> {
        let arr: [Slice; NUM_SLICES] = v
            .try_into()
            .map_err(|v: Vec<Slice>| SliceError::Count(v.len()))?;
        for (i, s) in arr.iter().enumerate() {
            if !(s.start.is_finite() && s.end.is_finite()) || s.end < s.start {
                return Err(SliceError::Inverted { index: i });
            }
            if i > 0 && arr[i - 1].end != s.start {
                return Err(SliceError::Gap { index: i });
            }
        }
        Ok(Self(arr))
    }
}

// ── Sequence ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Slot {
    #[default]
    Empty,
    Slice(usize),
}

/// One slot per 32nd note across the whole loop (`bars * beats_per_bar * 8`).
#[derive(Clone, Debug, PartialEq)]
pub struct Sequence {
    slots: Vec<Slot>,
}

impl Sequence {
    pub fn new(bars: usize, beats_per_bar: usize) -> Self {
        Self { slots: vec![Slot::Empty; total_steps(bars, beats_per_bar)] }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, step: usize) -> Slot {
        self.slots.get(step).copied().unwrap_or_default()
    }

    /// Last write wins.  Out-of-range steps and slice indices are ignored.
    pub fn set(&mut self, step: usize, slice: usize) {
        if slice >= NUM_SLICES {
            return;
        }
        if let Some(slot) = self.slots.get_mut(step) {
            *slot = Slot::Slice(slice);
        }
    }

    pub fn clear(&mut self) {
        self.slots.fill(Slot::Empty);
    }

    pub fn resize(&mut self, bars: usize, beats_per_bar: usize) {
        self.slots.resize(total_steps(bars, beats_per_bar), Slot::Empty);
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

pub fn total_steps(bars: usize, beats_per_bar: usize) -> usize {
    (bars * beats_per_bar * STEPS_PER_BEAT).max(1)
}

// ── Quantize ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Coarse grid: events snap to even (16th-aligned) steps.
    Sixteenth,
    #[default]
    ThirtySecond,
}

impl Resolution {
    pub fn toggle(self) -> Self {
        match self {
            Self::Sixteenth    => Self::ThirtySecond,
            Self::ThirtySecond => Self::Sixteenth,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Sixteenth    => "1/16",
            Self::ThirtySecond => "1/32",
        }
    }

    /// Whether `step` is a boundary a recorded event can land on.
    pub fn accepts(self, step: usize) -> bool {
        match self {
            Self::Sixteenth    => step % 2 == 0,
            Self::ThirtySecond => true,
        }
    }
}

/// Map time elapsed since the loop origin to a step index in `[0, total_steps)`.
///
/// Never fails: negative, oversized or non-finite inputs wrap or clamp.
pub fn quantize(elapsed: f64, bpm: f64, resolution: Resolution, total_steps: usize) -> usize {
    let total = total_steps.max(1) as i64;
    let raw = elapsed / clock::thirty_second(bpm);
    if !raw.is_finite() {
        return 0;
    }
    let step = match resolution {
        Resolution::ThirtySecond => raw.round() as i64,
        Resolution::Sixteenth    => (raw / 2.0).round() as i64 * 2,
    };
    step.rem_euclid(total) as usize
}
