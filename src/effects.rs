use std::f32::consts::PI;

/// Mono audio effect: one sample in, one sample out.
///
/// Implementations must be `Send` so they can live inside the audio thread
/// (behind `Arc<Mutex<Mixer>>`).
pub trait AudioEffect: Send {
    fn process(&mut self, sample: f32) -> f32;
    /// Reset all internal state (filter memory, envelopes).
    fn reset(&mut self);
}

// ── Biquad filter (RBJ Audio EQ Cookbook) ────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FilterMode { HighPass, BandPass }

/// Two-pole biquad.  Coefficients are fixed at construction; drum voices build
/// a fresh filter per hit from the bank preset.
#[derive(Clone, Debug)]
pub struct BiquadFilter {
    b0: f32, b1: f32, b2: f32, a1: f32, a2: f32,
    // Direct Form I delay state
    x1: f32, x2: f32, y1: f32, y2: f32,
}

impl BiquadFilter {
    pub fn new(mode: FilterMode, cutoff: f32, q: f32, sample_rate: f32) -> Self {
        let q     = q.max(0.05);
        let w0    = 2.0 * PI * cutoff.clamp(10.0, sample_rate * 0.499) / sample_rate;
        let cos_w = w0.cos();
        let sin_w = w0.sin();
        let alpha = sin_w / (2.0 * q);

        let (b0, b1, b2) = match mode {
            FilterMode::HighPass => { let h = (1.0 + cos_w) / 2.0; (h, -(1.0 + cos_w), h) }
            FilterMode::BandPass => { let h = alpha; (h, 0.0, -h) }
        };
        let a0 = 1.0 + alpha;
        Self {
            b0: b0 / a0, b1: b1 / a0, b2: b2 / a0,
            a1: -2.0 * cos_w / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0, x2: 0.0, y1: 0.0, y2: 0.0,
        }
    }
}

impl AudioEffect for BiquadFilter {
    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
                             - self.a1 * self.y1 - self.a2 * self.y2;
        self.x2 = self.x1;  self.x1 = x;
        self.y2 = self.y1;  self.y1 = y;
        y
    }

    fn reset(&mut self) {
        self.x1 = 0.0; self.x2 = 0.0; self.y1 = 0.0; self.y2 = 0.0;
    }
}

// ── Limiter ──────────────────────────────────────────────────────────────────

/// Peak limiter on the master bus.  Instant attack, exponential release.
pub struct Limiter {
    pub threshold: f32,
    envelope: f32,
    release_coeff: f32,
}

impl Limiter {
    pub fn new(sample_rate: f32) -> Self {
        let release_secs = 0.1;
        Self {
            threshold: 0.9,
            envelope: 0.0,
            release_coeff: (-1.0 / (release_secs * sample_rate)).exp(),
        }
    }
}

impl AudioEffect for Limiter {
    #[inline]
    fn process(&mut self, sample: f32) -> f32 {
        let peak = sample.abs();
        self.envelope = if peak > self.envelope {
            peak
        } else {
            peak + (self.envelope - peak) * self.release_coeff
        };
        if self.envelope > self.threshold {
            sample * (self.threshold / self.envelope)
        } else {
            sample
        }
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }
}
