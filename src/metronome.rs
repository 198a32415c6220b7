use std::f32::consts::TAU;

const CLICK_SECS: f32 = 0.12;

/// A short decaying sine burst.  Downbeats are higher and louder.
#[derive(Clone, Debug)]
pub struct ClickVoice {
    freq: f32,
    gain: f32,
    sample_pos: u64,
    dur_samples: u64,
    sample_rate: f32,
}

impl ClickVoice {
    pub fn new(accent: bool, sample_rate: f32) -> Self {
        let (freq, gain) = if accent { (1000.0, 0.8) } else { (800.0, 0.5) };
        Self {
            freq,
            gain,
            sample_pos: 0,
            dur_samples: (CLICK_SECS * sample_rate).ceil() as u64,
            sample_rate,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.sample_pos >= self.dur_samples
    }

    pub fn next_sample(&mut self) -> f32 {
        if self.is_finished() {
            return 0.0;
        }
        let t = self.sample_pos as f32 / self.sample_rate;
        self.sample_pos += 1;
        (t * self.freq * TAU).sin() * (-t * 40.0).exp() * self.gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(mut v: ClickVoice) -> f32 {
        let mut p = 0.0f32;
        while !v.is_finished() {
            p = p.max(v.next_sample().abs());
        }
        p
    }

    #[test]
    fn accent_is_louder_than_a_normal_click() {
        let accent = peak(ClickVoice::new(true, 44_100.0));
        let normal = peak(ClickVoice::new(false, 44_100.0));
        assert!(accent > normal);
        assert!(accent <= 0.8);
    }

    #[test]
    fn click_is_short() {
        let mut v = ClickVoice::new(false, 1000.0);
        let n = std::iter::from_fn(|| (!v.is_finished()).then(|| v.next_sample())).count();
        assert_eq!(n, 120);
        assert_eq!(v.next_sample(), 0.0);
    }
}
